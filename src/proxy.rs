//! Reverse-proxy registration for running sessions.
//!
//! The proxy's routing table lives elsewhere; the hub only adds, deletes
//! and lists routes through [`Proxy`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::hub::session::UserSession;
use crate::models::server::Server;
use crate::{AppError, BoxFuture, Result};

/// The default route; always valid and never pruned.
pub const DEFAULT_ROUTE: &str = "/";

/// One entry of the proxy table.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// `[host]/path/` prefix the route matches.
    pub routespec: String,
    /// Full URL requests are forwarded to.
    pub target: String,
    /// Data stored alongside the route, e.g. `{"user": name}`.
    pub data: Value,
}

/// Route registration contract of a reverse proxy.
pub trait Proxy: Send + Sync {
    /// Whether routes are host-qualified.
    fn host_routing(&self) -> bool;

    /// Add or replace the route for `routespec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the route cannot be registered.
    fn add_route<'a>(
        &'a self,
        routespec: &'a str,
        target: &'a str,
        data: Value,
    ) -> BoxFuture<'a, Result<()>>;

    /// Remove the route for `routespec`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy cannot be reached.
    fn delete_route<'a>(&'a self, routespec: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Every route, keyed by routespec.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy cannot be reached.
    fn get_all_routes(&self) -> BoxFuture<'_, Result<HashMap<String, Route>>>;
}

/// Check `routespec` against the routing mode and ensure a trailing slash.
///
/// # Errors
///
/// Returns `AppError::Config` for a host route without host routing, or a
/// bare path with host routing.
pub fn validate_routespec(routespec: &str, host_routing: bool) -> Result<String> {
    if routespec == DEFAULT_ROUTE {
        return Ok(routespec.to_owned());
    }
    let host_route = !routespec.starts_with('/');
    if host_route && !host_routing {
        return Err(AppError::Config(format!(
            "cannot add host-based route {routespec:?}, not using host-routing"
        )));
    }
    if host_routing && !host_route {
        return Err(AppError::Config(format!(
            "cannot add route without host {routespec:?}, using host-routing"
        )));
    }
    if routespec.ends_with('/') {
        Ok(routespec.to_owned())
    } else {
        Ok(format!("{routespec}/"))
    }
}

/// Route `session`'s server through the proxy.
///
/// # Errors
///
/// Returns `AppError::Backend` while the spawn is still pending,
/// `AppError::NotFound` if the session holds no server, or the proxy error.
pub async fn add_user(proxy: &dyn Proxy, session: &UserSession) -> Result<()> {
    if session.spawn_pending() {
        return Err(AppError::Backend(format!(
            "spawn of {} is pending, not adding it to the proxy yet",
            session.name()
        )));
    }
    let server = session
        .server()
        .ok_or_else(|| AppError::NotFound(format!("{} has no server", session.name())))?;
    let routespec = session.proxy_spec();
    let target = server.host();
    info!(user = %session.name(), %routespec, %target, "adding user to proxy");
    proxy
        .add_route(&routespec, &target, json!({ "user": session.name() }))
        .await
}

/// Remove `session`'s route from the proxy.
///
/// # Errors
///
/// Returns the proxy error.
pub async fn delete_user(proxy: &dyn Proxy, session: &UserSession) -> Result<()> {
    info!(user = %session.name(), "removing user from proxy");
    proxy.delete_route(&session.proxy_spec()).await
}

/// Reconcile the proxy table with `sessions`: add or repoint the route of
/// every running session and delete routes no running session owns.
///
/// # Errors
///
/// Returns the first proxy error encountered.
pub async fn check_routes(proxy: &dyn Proxy, sessions: &[&UserSession]) -> Result<()> {
    let routes = proxy.get_all_routes().await?;

    if !routes.contains_key(DEFAULT_ROUTE) {
        warn!("default route is missing from the proxy");
    }

    let mut good_routes: HashSet<String> = HashSet::from([DEFAULT_ROUTE.to_owned()]);
    for session in sessions.iter().filter(|s| s.running()) {
        let routespec = session.proxy_spec();
        let target = session.server().map(Server::host);
        match routes.get(&routespec) {
            None => {
                warn!(user = %session.name(), %routespec, "adding missing route");
                add_user(proxy, session).await?;
            }
            Some(route) if target.as_deref() != Some(route.target.as_str()) => {
                warn!(
                    user = %session.name(),
                    %routespec,
                    stale_target = %route.target,
                    "updating route with wrong target"
                );
                add_user(proxy, session).await?;
            }
            Some(_) => {}
        }
        good_routes.insert(routespec);
    }

    for routespec in routes.keys() {
        if !good_routes.contains(routespec) {
            warn!(%routespec, "deleting stale route");
            proxy.delete_route(routespec).await?;
        }
    }
    Ok(())
}

/// Proxy table held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryProxy {
    host_routing: bool,
    routes: Mutex<HashMap<String, Route>>,
}

impl MemoryProxy {
    /// Empty table.
    #[must_use]
    pub fn new(host_routing: bool) -> Self {
        Self {
            host_routing,
            routes: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Proxy for MemoryProxy {
    fn host_routing(&self) -> bool {
        self.host_routing
    }

    fn add_route<'a>(
        &'a self,
        routespec: &'a str,
        target: &'a str,
        data: Value,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let routespec = validate_routespec(routespec, self.host_routing)?;
            self.table().insert(
                routespec.clone(),
                Route {
                    routespec,
                    target: target.to_owned(),
                    data,
                },
            );
            Ok(())
        })
    }

    fn delete_route<'a>(&'a self, routespec: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let routespec = validate_routespec(routespec, self.host_routing)?;
            self.table().remove(&routespec);
            Ok(())
        })
    }

    fn get_all_routes(&self) -> BoxFuture<'_, Result<HashMap<String, Route>>> {
        Box::pin(async move { Ok(self.table().clone()) })
    }
}
