//! Identity map from persisted users to live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::models::user::UserRecord;
use crate::persistence::db::Database;
use crate::persistence::user_repo::UserRepo;
use crate::{AppError, Result};

use super::session::UserSession;
use super::HubSettings;

/// A session shared between request handlers.
pub type SharedSession = Arc<Mutex<UserSession>>;

/// How a caller names a user.
#[derive(Debug, Clone)]
pub enum UserKey {
    /// Persistent id.
    Id(i64),
    /// Unique user name.
    Name(String),
    /// An already loaded record.
    Record(UserRecord),
}

impl From<i64> for UserKey {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for UserKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<UserRecord> for UserKey {
    fn from(record: UserRecord) -> Self {
        Self::Record(record)
    }
}

/// Lazily populated cache holding one session per user id.
///
/// The cache is keyed by id only; names are resolved through storage.
pub struct UserRegistry {
    db: Arc<Database>,
    settings: HubSettings,
    sessions: Mutex<HashMap<i64, SharedSession>>,
}

impl UserRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new(db: Arc<Database>, settings: HubSettings) -> Self {
        Self {
            db,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn users(&self) -> UserRepo {
        UserRepo::new(Arc::clone(&self.db))
    }

    async fn resolve(&self, key: UserKey) -> Result<UserRecord> {
        match key {
            UserKey::Record(record) => Ok(record),
            UserKey::Id(id) => self.users().get_by_id(id).await,
            UserKey::Name(name) => self
                .users()
                .find_by_name(&name)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("user {name} not found"))),
        }
    }

    /// Session for `key`, constructing and caching it on first lookup.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown users, or the error raised
    /// while building the session.
    pub async fn get(&self, key: impl Into<UserKey>) -> Result<SharedSession> {
        let key = key.into();
        let cached_id = match &key {
            UserKey::Id(id) => Some(*id),
            UserKey::Record(record) => Some(record.id),
            UserKey::Name(_) => None,
        };

        if let Some(session) = self.cached(cached_id).await {
            return Ok(session);
        }

        let record = self.resolve(key).await?;
        if let Some(session) = self.cached(Some(record.id)).await {
            return Ok(session);
        }

        debug!(user = %record.name, id = record.id, "creating session");
        let id = record.id;
        let session = UserSession::new(record, Arc::clone(&self.db), self.settings.clone()).await?;

        // another lookup may have built the same session meanwhile; keep the first
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(session)));
        Ok(Arc::clone(session))
    }

    async fn cached(&self, id: Option<i64>) -> Option<SharedSession> {
        let id = id?;
        self.sessions.lock().await.get(&id).cloned()
    }

    /// Whether a session for `id` is cached.
    pub async fn contains(&self, id: i64) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }

    /// Every cached session.
    pub async fn sessions(&self) -> Vec<SharedSession> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Delete a user: stop any server it still holds, remove the user with
    /// its servers and tokens from storage, then evict the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown users or `AppError::Db` if
    /// the delete fails.
    pub async fn delete(&self, key: impl Into<UserKey>) -> Result<()> {
        let session = self.get(key).await?;
        let id = {
            let mut session = session.lock().await;
            if !session.servers().is_empty() {
                if let Err(err) = session.stop().await {
                    error!(user = %session.name(), %err, "failed to stop server of deleted user");
                }
            }
            self.users().delete(session.id()).await?;
            info!(user = %session.name(), "user deleted");
            session.id()
        };
        self.sessions.lock().await.remove(&id);
        Ok(())
    }
}
