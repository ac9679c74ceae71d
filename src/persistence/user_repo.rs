//! User repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::token::hash_token;
use crate::models::user::{NewUser, UserRecord};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for user records.
#[derive(Clone)]
pub struct UserRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    admin: i64,
    last_activity: String,
    cookie_id: String,
    state: String,
}

impl UserRow {
    fn into_user(self) -> Result<UserRecord> {
        let last_activity = DateTime::parse_from_rfc3339(&self.last_activity)
            .map_err(|e| AppError::Db(format!("invalid last_activity: {e}")))?
            .with_timezone(&Utc);
        let state: Value = serde_json::from_str(&self.state)?;

        Ok(UserRecord {
            id: self.id,
            name: self.name,
            admin: self.admin != 0,
            last_activity,
            cookie_id: self.cookie_id,
            state,
        })
    }
}

const SELECT_USER: &str =
    "SELECT id, name, admin, last_activity, cookie_id, state FROM users";

/// Runtime fields written back when a server stops.
#[derive(Debug, Clone)]
pub struct StopRecord<'a> {
    /// Spawner state after `clear_state`.
    pub state: &'a Value,
    /// Stop timestamp.
    pub last_activity: DateTime<Utc>,
    /// Token to revoke, unless the spawner will resume with it.
    pub revoke_token: Option<&'a str>,
}

impl UserRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails (for example a duplicate name).
    pub async fn create(&self, user: &NewUser) -> Result<UserRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (name, admin, last_activity, cookie_id, state)
             VALUES (?1, ?2, ?3, ?4, '{}')",
        )
        .bind(&user.name)
        .bind(i64::from(user.admin))
        .bind(now.to_rfc3339())
        .bind(NewUser::new_cookie_id())
        .execute(self.db.as_ref())
        .await?;

        self.get_by_id(result.last_insert_rowid()).await
    }

    /// Look a user up by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} WHERE name = ?1"))
            .bind(name)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(UserRow::into_user).transpose()
    }

    /// Look a user up by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(UserRow::into_user).transpose()
    }

    /// Fetch a user that must exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no user has this id.
    pub async fn get_by_id(&self, id: i64) -> Result<UserRecord> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no such user: {id}")))
    }

    /// All users ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!("{SELECT_USER} ORDER BY name ASC"))
            .fetch_all(self.db.as_ref())
            .await?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    /// Persist spawner state and activity after a successful start.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_runtime(
        &self,
        id: i64,
        state: &Value,
        last_activity: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET state = ?1, last_activity = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(state)?)
            .bind(last_activity.to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Write back the outcome of a stop as one transaction: runtime fields,
    /// removal of every server record, and revocation of the token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any statement fails; nothing is committed then.
    pub async fn record_stop(&self, id: i64, stop: &StopRecord<'_>) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE users SET state = ?1, last_activity = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(stop.state)?)
            .bind(stop.last_activity.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM servers WHERE user_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if let Some(token) = stop.revoke_token.filter(|t| !t.is_empty()) {
            sqlx::query("DELETE FROM api_tokens WHERE hashed = ?1")
                .bind(hash_token(token))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a user together with its servers and tokens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let mut tx = self.db.begin().await?;
        for query in [
            "DELETE FROM api_tokens WHERE user_id = ?1",
            "DELETE FROM servers WHERE user_id = ?1",
            "DELETE FROM users WHERE id = ?1",
        ] {
            sqlx::query(query).bind(id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
