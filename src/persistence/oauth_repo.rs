//! OAuth client store backed by `SQLite`.

use std::sync::Arc;

use crate::models::oauth::OAuthClient;
use crate::models::token::hash_token;
use crate::oauth::OAuthClientStore;
use crate::{AppError, BoxFuture, Result};

use super::db::Database;

/// Repository for registered OAuth clients.
#[derive(Clone)]
pub struct OAuthClientRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct ClientRow {
    identifier: String,
    secret_hash: String,
    redirect_uri: String,
}

impl OAuthClientRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fetch a client by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no client is registered under `client_id`.
    pub async fn fetch(&self, client_id: &str) -> Result<OAuthClient> {
        let row: Option<ClientRow> = sqlx::query_as(
            "SELECT identifier, secret_hash, redirect_uri FROM oauth_clients WHERE identifier = ?1",
        )
        .bind(client_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(|r| OAuthClient {
            identifier: r.identifier,
            secret_hash: r.secret_hash,
            redirect_uri: r.redirect_uri,
        })
        .ok_or_else(|| AppError::NotFound(format!("oauth client {client_id} not found")))
    }

    /// Register a client, replacing any previous registration with that id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn upsert(&self, client_id: &str, secret: &str, redirect_uri: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO oauth_clients (identifier, secret_hash, redirect_uri)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identifier) DO UPDATE SET
                secret_hash = excluded.secret_hash,
                redirect_uri = excluded.redirect_uri",
        )
        .bind(client_id)
        .bind(hash_token(secret))
        .bind(redirect_uri)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }
}

impl OAuthClientStore for OAuthClientRepo {
    fn fetch_by_client_id<'a>(&'a self, client_id: &'a str) -> BoxFuture<'a, Result<OAuthClient>> {
        Box::pin(self.fetch(client_id))
    }

    fn add_client<'a>(
        &'a self,
        client_id: &'a str,
        secret: &'a str,
        redirect_uri: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.upsert(client_id, secret, redirect_uri))
    }
}
