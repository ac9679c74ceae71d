//! OAuth client registered for a spawned server.

use serde::{Deserialize, Serialize};

/// An OAuth client as held by the client store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthClient {
    /// Deterministic client id, `user-{name}[-{server}]`.
    pub identifier: String,
    /// SHA-256 of the client secret, lowercase hex.
    pub secret_hash: String,
    /// Callback URL the authorization server redirects to.
    pub redirect_uri: String,
}
