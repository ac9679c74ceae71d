//! OAuth client-store contract consumed when spawning.

use crate::models::oauth::OAuthClient;
use crate::{BoxFuture, Result};

/// Where per-server OAuth clients are registered.
pub trait OAuthClientStore: Send + Sync {
    /// Look a client up by id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) when no
    /// client is registered under `client_id`.
    fn fetch_by_client_id<'a>(&'a self, client_id: &'a str) -> BoxFuture<'a, Result<OAuthClient>>;

    /// Register (or re-register) a client with its secret and callback URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot persist the client.
    fn add_client<'a>(
        &'a self,
        client_id: &'a str,
        secret: &'a str,
        redirect_uri: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}
