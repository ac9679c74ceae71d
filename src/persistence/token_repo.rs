//! API token repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::token::{hash_token, new_token, token_prefix, ApiToken};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for API tokens. Only hashes are stored.
#[derive(Clone)]
pub struct TokenRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TokenRow {
    id: i64,
    user_id: i64,
    server_name: String,
    prefix: String,
    hashed: String,
    created_at: String,
}

impl TokenRow {
    fn into_token(self) -> Result<ApiToken> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(ApiToken {
            id: self.id,
            user_id: self.user_id,
            server_name: self.server_name,
            prefix: self.prefix,
            hashed: self.hashed,
            created_at,
        })
    }
}

impl TokenRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Issue a fresh token for `user_id`'s server and return the raw secret.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn issue(&self, user_id: i64, server_name: &str) -> Result<String> {
        let token = new_token();
        sqlx::query(
            "INSERT INTO api_tokens (user_id, server_name, prefix, hashed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(user_id)
        .bind(server_name)
        .bind(token_prefix(&token))
        .bind(hash_token(&token))
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(token)
    }

    /// Find the stored record for a raw token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find(&self, token: &str) -> Result<Option<ApiToken>> {
        let row: Option<TokenRow> = sqlx::query_as(
            "SELECT id, user_id, server_name, prefix, hashed, created_at
             FROM api_tokens WHERE prefix = ?1 AND hashed = ?2",
        )
        .bind(token_prefix(token))
        .bind(hash_token(token))
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(TokenRow::into_token).transpose()
    }

    /// Delete the record for a raw token. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE hashed = ?1")
            .bind(hash_token(token))
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of live tokens belonging to a user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_for_user(&self, user_id: i64) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM api_tokens WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(self.db.as_ref())
            .await?;
        u64::try_from(row.0).map_err(|e| AppError::Db(format!("invalid count: {e}")))
    }
}
