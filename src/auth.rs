//! Authenticator lifecycle hooks run around a spawn.

use crate::hub::session::UserSession;
use crate::spawner::Spawner;
use crate::{BoxFuture, Result};

/// Hooks an authenticator may run around a user's server lifecycle.
///
/// Both hooks default to doing nothing.
pub trait Authenticator: Send + Sync {
    /// Runs after the server record and token exist but before the backend
    /// starts. An error aborts the spawn.
    ///
    /// # Errors
    ///
    /// Implementations return an error to refuse the spawn.
    fn pre_spawn_start<'a>(
        &'a self,
        _user: &'a UserSession,
        _spawner: &'a dyn Spawner,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Runs after a server has stopped. Errors are logged by the caller and
    /// otherwise ignored.
    ///
    /// # Errors
    ///
    /// Implementations may report failures; they never abort the stop.
    fn post_spawn_stop<'a>(
        &'a self,
        _user: &'a UserSession,
        _spawner: &'a dyn Spawner,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
