//! Per-user session state machine and the registry that owns sessions.

pub mod registry;
pub mod session;

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::config::{HubConfig, SpawnerConfig};
use crate::oauth::OAuthClientStore;
use crate::persistence::db::Database;
use crate::persistence::oauth_repo::OAuthClientRepo;
use crate::spawner::{ConfiguredSpawnerFactory, HubInfo, SpawnerFactory};

pub use registry::{SharedSession, UserKey, UserRegistry};
pub use session::{SpawnOptions, UserSession};

/// Hub-wide settings and collaborators shared by every session.
#[derive(Clone)]
pub struct HubSettings {
    /// Public URL prefix; user servers live under `{base_url}user/{name}/`.
    pub base_url: String,
    /// Allow several named servers per user.
    pub allow_named_servers: bool,
    /// Grant hub admins access to user servers.
    pub admin_access: bool,
    /// Enables per-user subdomains when set.
    pub subdomain_host: Option<String>,
    /// Hub endpoints handed to spawners.
    pub hub: HubInfo,
    /// Backend settings handed to spawners.
    pub spawner_config: SpawnerConfig,
    /// Builds one spawner per session.
    pub spawner_factory: Arc<dyn SpawnerFactory>,
    /// Optional authenticator whose hooks run around spawn and stop.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Optional OAuth client store.
    pub oauth_store: Option<Arc<dyn OAuthClientStore>>,
}

impl HubSettings {
    /// Settings derived from configuration, with the configured spawner
    /// factory and, when enabled, the `SQLite` OAuth client store.
    #[must_use]
    pub fn from_config(config: &HubConfig, db: &Arc<Database>) -> Self {
        let oauth_store: Option<Arc<dyn OAuthClientStore>> = if config.oauth_enabled {
            Some(Arc::new(OAuthClientRepo::new(Arc::clone(db))))
        } else {
            None
        };
        Self {
            base_url: config.base_url.clone(),
            allow_named_servers: config.allow_named_servers,
            admin_access: config.admin_access,
            subdomain_host: config.subdomain_host.clone(),
            hub: HubInfo {
                api_url: config.hub_api_url.clone(),
                prefix: config.hub_prefix.clone(),
            },
            spawner_config: config.spawner.clone(),
            spawner_factory: Arc::new(ConfiguredSpawnerFactory::new(config.spawner.clone())),
            authenticator: None,
            oauth_store,
        }
    }

    /// Replace the spawner factory.
    #[must_use]
    pub fn with_spawner_factory(mut self, factory: Arc<dyn SpawnerFactory>) -> Self {
        self.spawner_factory = factory;
        self
    }

    /// Install an authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Replace (or remove) the OAuth client store.
    #[must_use]
    pub fn with_oauth_store(mut self, store: Option<Arc<dyn OAuthClientStore>>) -> Self {
        self.oauth_store = store;
        self
    }

    /// Host part of `subdomain_host`, the suffix of every user domain.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        split_host(self.subdomain_host.as_deref()?).map(|(_, netloc)| netloc)
    }
}

/// Split `scheme://netloc[/...]` into scheme and netloc.
pub(crate) fn split_host(url: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    let netloc = rest.split('/').next().unwrap_or(rest);
    Some((scheme, netloc))
}
