#![forbid(unsafe_code)]

//! Lifecycle core for per-user single-user servers in a multi-tenant
//! notebook hub: spawning, readiness tracking, teardown, and the token,
//! OAuth and proxy bookkeeping around them.

use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod backoff;
pub mod config;
pub mod errors;
pub mod hub;
pub mod models;
pub mod oauth;
pub mod persistence;
pub mod proxy;
pub mod spawner;
pub mod urls;
pub mod version;

pub use config::HubConfig;
pub use errors::{AppError, FailureReason, Result};

/// Boxed, `Send` future returned by the object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
