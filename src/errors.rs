//! Error types shared across the hub core.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Why a spawn was abandoned; attached to the error handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Start or readiness wait exceeded its time budget.
    Timeout,
    /// The backend raised an unexpected error.
    Error,
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or process I/O failure.
    Io(String),
    /// HTTP client failure that is not a retryable connection problem.
    Http(String),
    /// An operation exceeded its time budget.
    Timeout(String),
    /// The spawner backend failed while starting, polling or stopping.
    Backend(String),
    /// An authenticator hook failed.
    Hook(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A spawn was abandoned; the original failure is kept as `source`.
    Spawn {
        /// Tag describing why the spawn failed.
        reason: FailureReason,
        /// The failure that aborted the spawn.
        source: Box<AppError>,
    },
}

impl AppError {
    /// Failure tag for an abandoned spawn, if this error is one.
    #[must_use]
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Spawn { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether this error (or the failure it wraps) is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Spawn { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::Hook(msg) => write!(f, "hook: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Spawn { reason, source } => write!(f, "spawn failed ({reason}): {source}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
