//! API tokens handed to single-user servers.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of leading characters stored in clear to narrow lookups.
pub const PREFIX_LENGTH: usize = 4;

/// A stored API token. The raw secret is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiToken {
    /// Row id.
    pub id: i64,
    /// Owning user id.
    pub user_id: i64,
    /// Server the token was issued for.
    pub server_name: String,
    /// First [`PREFIX_LENGTH`] characters of the raw token.
    pub prefix: String,
    /// SHA-256 of the raw token, lowercase hex.
    pub hashed: String,
    /// Issue timestamp.
    pub created_at: DateTime<Utc>,
}

/// Generate a new random token.
#[must_use]
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Hash a raw token for storage and lookup.
#[must_use]
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Clear-text prefix stored alongside the hash.
#[must_use]
pub fn token_prefix(token: &str) -> String {
    token.chars().take(PREFIX_LENGTH).collect()
}
