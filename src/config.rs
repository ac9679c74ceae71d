//! Hub configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Which spawner implementation backs every session.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpawnerKind {
    /// Launch the single-user server as a local child process.
    #[default]
    LocalProcess,
}

/// Settings handed to every spawner built by the configured factory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SpawnerConfig {
    /// Backend implementation to use.
    #[serde(default)]
    pub kind: SpawnerKind,
    /// Command used to start the single-user server.
    #[serde(default = "default_cmd")]
    pub cmd: Vec<String>,
    /// Extra arguments appended after the generated ones.
    #[serde(default)]
    pub args: Vec<String>,
    /// Address the single-user server should listen on.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// Working directory passed as `--notebook-dir`; empty means unset.
    #[serde(default)]
    pub notebook_dir: String,
    /// Pass `--debug` to the single-user server.
    #[serde(default)]
    pub debug: bool,
    /// Environment variables inherited from the hub process.
    #[serde(default = "default_env_keep")]
    pub env_keep: Vec<String>,
    /// Budget for `start()` to return.
    #[serde(default = "default_start_timeout")]
    pub start_timeout_seconds: u64,
    /// Budget for the started server to answer HTTP.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// Liveness monitor interval; 0 disables polling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Wait after SIGINT before escalating.
    #[serde(default = "default_interrupt_timeout")]
    pub interrupt_timeout_seconds: u64,
    /// Wait after SIGTERM before escalating.
    #[serde(default = "default_term_timeout")]
    pub term_timeout_seconds: u64,
    /// Wait after SIGKILL before giving up.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_seconds: u64,
}

fn default_cmd() -> Vec<String> {
    vec!["jupyterhub-singleuser".into()]
}

fn default_ip() -> String {
    "127.0.0.1".into()
}

fn default_env_keep() -> Vec<String> {
    [
        "PATH",
        "PYTHONPATH",
        "CONDA_ROOT",
        "CONDA_DEFAULT_ENV",
        "VIRTUAL_ENV",
        "LANG",
        "LC_ALL",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_start_timeout() -> u64 {
    60
}

fn default_http_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    30
}

fn default_interrupt_timeout() -> u64 {
    10
}

fn default_term_timeout() -> u64 {
    5
}

fn default_kill_timeout() -> u64 {
    5
}

fn default_base_url() -> String {
    "/".into()
}

fn default_hub_prefix() -> String {
    "/hub/".into()
}

fn default_hub_api_url() -> String {
    "http://127.0.0.1:8081/hub/api".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("userhub.sqlite")
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            kind: SpawnerKind::default(),
            cmd: default_cmd(),
            args: Vec::new(),
            ip: default_ip(),
            notebook_dir: String::new(),
            debug: false,
            env_keep: default_env_keep(),
            start_timeout_seconds: default_start_timeout(),
            http_timeout_seconds: default_http_timeout(),
            poll_interval_seconds: default_poll_interval(),
            interrupt_timeout_seconds: default_interrupt_timeout(),
            term_timeout_seconds: default_term_timeout(),
            kill_timeout_seconds: default_kill_timeout(),
        }
    }
}

impl SpawnerConfig {
    /// `start_timeout_seconds` as a [`Duration`].
    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_seconds)
    }

    /// `http_timeout_seconds` as a [`Duration`].
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// `poll_interval_seconds` as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Hub configuration parsed from `hub.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HubConfig {
    /// Public URL prefix under which user servers are routed.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Allow a user to run several servers distinguished by name.
    #[serde(default)]
    pub allow_named_servers: bool,
    /// Grant hub admins access to user servers.
    #[serde(default)]
    pub admin_access: bool,
    /// Enables per-user subdomains, e.g. `https://hub.example.com`.
    #[serde(default)]
    pub subdomain_host: Option<String>,
    /// Hub API endpoint passed to single-user servers.
    #[serde(default = "default_hub_api_url")]
    pub hub_api_url: String,
    /// Hub URL prefix passed to single-user servers.
    #[serde(default = "default_hub_prefix")]
    pub hub_prefix: String,
    /// Register an OAuth client for each spawned server.
    #[serde(default = "default_true")]
    pub oauth_enabled: bool,
    /// Backend settings.
    #[serde(default)]
    pub spawner: SpawnerConfig,
}

fn default_true() -> bool {
    true
}

impl HubConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Host part of `subdomain_host`, used as the user domain suffix.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.subdomain_host
            .as_deref()
            .and_then(|host| host.split_once("://"))
            .map(|(_, rest)| rest.trim_end_matches('/'))
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [("base_url", &self.base_url), ("hub_prefix", &self.hub_prefix)] {
            if !value.starts_with('/') || !value.ends_with('/') {
                return Err(AppError::Config(format!(
                    "{key} must start and end with '/', got {value:?}"
                )));
            }
        }

        if let Some(host) = &self.subdomain_host {
            if !host.contains("://") {
                return Err(AppError::Config(format!(
                    "subdomain_host must include a scheme, got {host:?}"
                )));
            }
        }

        if self.spawner.cmd.is_empty() {
            return Err(AppError::Config("spawner.cmd must not be empty".into()));
        }

        if self.spawner.start_timeout_seconds == 0 || self.spawner.http_timeout_seconds == 0 {
            return Err(AppError::Config(
                "spawner timeouts must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
