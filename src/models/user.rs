//! Persistent user identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A hub user as stored in the `users` table.
///
/// Only the persistence layer creates ids; sessions read and write the
/// runtime fields (`last_activity`, `state`) through their repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    /// Numeric primary key.
    pub id: i64,
    /// Unique login name.
    pub name: String,
    /// Whether the user is a hub administrator.
    pub admin: bool,
    /// Last successful start or stop of one of the user's servers.
    pub last_activity: DateTime<Utc>,
    /// Random id used to invalidate cookies.
    pub cookie_id: String,
    /// Opaque spawner resume state.
    pub state: Value,
}

/// Fields needed to insert a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Unique login name.
    pub name: String,
    /// Whether the user is a hub administrator.
    pub admin: bool,
}

impl NewUser {
    /// Regular (non-admin) user with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: false,
        }
    }

    /// Fresh cookie id for a newly inserted user.
    #[must_use]
    pub fn new_cookie_id() -> String {
        Uuid::new_v4().simple().to_string()
    }
}
