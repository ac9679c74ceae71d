//! Spawner contract: the pluggable backend that starts and stops a user's
//! single-user server.
//!
//! The hub core only talks to backends through [`Spawner`]. Which
//! implementation backs a session is decided by a [`SpawnerFactory`], built
//! once per session from configuration.

pub mod local;
pub mod monitor;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::auth::Authenticator;
use crate::config::{SpawnerConfig, SpawnerKind};
use crate::models::server::Server;
use crate::models::user::UserRecord;
use crate::{BoxFuture, Result};

pub use local::LocalProcessSpawner;
pub use monitor::{ExitCallback, LivenessMonitor};

/// Liveness of a backend as reported by [`Spawner::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Still running.
    Running,
    /// Gone, with its exit status (0 when unknown).
    Exited(i32),
}

/// Where single-user servers reach the hub.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HubInfo {
    /// Hub REST API URL.
    pub api_url: String,
    /// Hub URL prefix.
    pub prefix: String,
}

/// Everything a spawner is bound to when its session is created.
#[derive(Clone)]
pub struct SpawnerBinding {
    /// Owning user id.
    pub user_id: i64,
    /// Owning user name.
    pub user_name: String,
    /// Hub endpoints.
    pub hub: HubInfo,
    /// Configured authenticator, if any.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Backend settings.
    pub config: SpawnerConfig,
}

/// Fields every spawner carries and the hub core reads or writes.
#[derive(Clone, Default)]
pub struct SpawnerOptions {
    /// Owning user id.
    pub user_id: i64,
    /// Owning user name.
    pub user_name: String,
    /// Hub endpoints.
    pub hub: HubInfo,
    /// Configured authenticator, if any.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Token the server uses to talk to the hub.
    pub api_token: String,
    /// Named-server slot; empty for the default server.
    pub server_name: String,
    /// Options the user supplied when requesting the spawn.
    pub user_options: Map<String, Value>,
    /// Whether hub admins may access this server.
    pub admin_access: bool,
    /// OAuth client registered for this server.
    pub oauth_client_id: String,
    /// Budget for `start()`.
    pub start_timeout: Duration,
    /// Budget for the server to answer HTTP after `start()`.
    pub http_timeout: Duration,
    /// Liveness monitor interval; zero disables polling.
    pub poll_interval: Duration,
    /// Record reserved for the server being launched.
    pub server: Option<Server>,
}

impl SpawnerOptions {
    /// Copy the binding's identity and timeouts into these options.
    pub fn bind(&mut self, binding: &SpawnerBinding) {
        self.user_id = binding.user_id;
        self.user_name.clone_from(&binding.user_name);
        self.hub = binding.hub.clone();
        self.authenticator.clone_from(&binding.authenticator);
        self.start_timeout = binding.config.start_timeout();
        self.http_timeout = binding.config.http_timeout();
        self.poll_interval = binding.config.poll_interval();
    }
}

/// A backend able to launch, watch and stop one single-user server.
///
/// `start`, `poll` and `stop` are suspension points; `stop` must be safe to
/// call on a backend that has already exited.
pub trait Spawner: Send + Sync {
    /// Shared fields.
    fn options(&self) -> &SpawnerOptions;

    /// Shared fields, mutably.
    fn options_mut(&mut self) -> &mut SpawnerOptions;

    /// Bind user, hub, authenticator and backend settings before first use.
    fn configure(&mut self, binding: &SpawnerBinding) {
        self.options_mut().bind(binding);
    }

    /// True when stopping preserves enough state to hand the same API token
    /// and OAuth client back on the next start.
    fn will_resume(&self) -> bool {
        false
    }

    /// Restore state persisted by a previous hub process.
    fn load_state(&mut self, _state: &Value) {}

    /// State to persist so the backend can be found again after a restart.
    fn get_state(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Forget per-launch state. Clears the API token.
    fn clear_state(&mut self) {
        self.options_mut().api_token.clear();
    }

    /// Launch the server. Returns where it listens, or `None` for backends
    /// that recorded the address themselves (deprecated).
    fn start(&mut self) -> BoxFuture<'_, Result<Option<(String, u16)>>>;

    /// Non-blocking liveness check.
    fn poll(&mut self) -> BoxFuture<'_, Result<PollStatus>>;

    /// Stop the server; `now` skips the graceful phase.
    fn stop(&mut self, now: bool) -> BoxFuture<'_, Result<()>>;

    /// Begin background liveness monitoring.
    fn start_polling(&mut self) {}

    /// End background liveness monitoring.
    fn stop_polling(&mut self) {}
}

/// Builds the spawner for a newly constructed session.
pub trait SpawnerFactory: Send + Sync {
    /// Create an unconfigured spawner for `user`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the backend cannot be built.
    fn build(&self, user: &UserRecord) -> Result<Box<dyn Spawner>>;
}

/// Factory selecting the implementation named by `[spawner].kind`.
#[derive(Debug, Clone)]
pub struct ConfiguredSpawnerFactory {
    config: SpawnerConfig,
}

impl ConfiguredSpawnerFactory {
    /// Factory for the given backend settings.
    #[must_use]
    pub fn new(config: SpawnerConfig) -> Self {
        Self { config }
    }
}

impl SpawnerFactory for ConfiguredSpawnerFactory {
    fn build(&self, _user: &UserRecord) -> Result<Box<dyn Spawner>> {
        match self.config.kind {
            SpawnerKind::LocalProcess => Ok(Box::new(LocalProcessSpawner::new(self.config.clone()))),
        }
    }
}
