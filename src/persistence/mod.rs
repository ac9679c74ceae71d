//! Persistence layer modules.

pub mod db;
pub mod oauth_repo;
pub mod schema;
pub mod server_repo;
pub mod token_repo;
pub mod user_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
