//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE,
    admin           INTEGER NOT NULL DEFAULT 0,
    last_activity   TEXT NOT NULL,
    cookie_id       TEXT NOT NULL,
    state           TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS servers (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name            TEXT NOT NULL DEFAULT '',
    proto           TEXT NOT NULL DEFAULT 'http',
    ip              TEXT NOT NULL DEFAULT '',
    port            INTEGER NOT NULL DEFAULT 0,
    base_url        TEXT NOT NULL,
    UNIQUE(user_id, name)
);

CREATE TABLE IF NOT EXISTS api_tokens (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    server_name     TEXT NOT NULL DEFAULT '',
    prefix          TEXT NOT NULL,
    hashed          TEXT NOT NULL UNIQUE,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS oauth_clients (
    identifier      TEXT PRIMARY KEY NOT NULL,
    secret_hash     TEXT NOT NULL,
    redirect_uri    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_servers_user ON servers(user_id);
CREATE INDEX IF NOT EXISTS idx_api_tokens_prefix ON api_tokens(prefix);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
