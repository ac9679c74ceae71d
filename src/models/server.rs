//! Server record: where a running single-user server lives.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{self, connectable_ip};
use crate::{AppError, Result};

/// Address and base path of one single-user server.
///
/// Records are created before the backend starts so the URL and token can
/// be reserved; `ip`/`port` are filled in once the spawner reports them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    /// Row id; 0 for servers that are not persisted.
    pub id: i64,
    /// Owning user id.
    pub user_id: i64,
    /// Server name; empty unless named servers are enabled.
    pub name: String,
    /// URL scheme, normally `http`.
    pub proto: String,
    /// Listening address; empty or `0.0.0.0` means all interfaces.
    pub ip: String,
    /// Listening port; 0 until the backend reports one.
    pub port: u16,
    /// URL prefix the server is mounted under.
    pub base_url: String,
}

impl Server {
    /// An unsaved `http` record for `base_url`.
    #[must_use]
    pub fn new(user_id: i64, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: 0,
            user_id,
            name: name.into(),
            proto: "http".into(),
            ip: String::new(),
            port: 0,
            base_url: base_url.into(),
        }
    }

    /// Parse `proto://host[:port]/path` into an unsaved record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL has no scheme or an invalid port.
    pub fn from_url(url: &str) -> Result<Self> {
        let (proto, rest) = url
            .split_once("://")
            .ok_or_else(|| AppError::Config(format!("url has no scheme: {url}")))?;
        let (authority, path) = rest
            .find('/')
            .map_or((rest, "/"), |idx| (&rest[..idx], &rest[idx..]));
        let (ip, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|err| AppError::Config(format!("invalid port in {url}: {err}")))?;
                (host, port)
            }
            None if proto == "https" => (authority, 443),
            None => (authority, 80),
        };
        Ok(Self {
            id: 0,
            user_id: 0,
            name: String::new(),
            proto: proto.to_owned(),
            ip: ip.to_owned(),
            port,
            base_url: path.to_owned(),
        })
    }

    /// Address used to reach the server.
    #[must_use]
    pub fn connect_ip(&self) -> &str {
        connectable_ip(&self.ip)
    }

    /// `proto://ip:port` without the base path.
    #[must_use]
    pub fn host(&self) -> String {
        format!("{}://{}:{}", self.proto, self.connect_ip(), self.port)
    }

    /// Full URL including the base path.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.host(), self.base_url)
    }

    /// URL as bound, with `*` for all-interfaces. Only meant for logs.
    #[must_use]
    pub fn bind_url(&self) -> String {
        if self.ip.is_empty() || self.ip == "0.0.0.0" {
            let bind_ip = if self.ip.is_empty() { "*" } else { &self.ip };
            format!("{}://{}:{}{}", self.proto, bind_ip, self.port, self.base_url)
        } else {
            self.url()
        }
    }

    /// Wait until the server answers, over HTTP when `http` is set and with
    /// a bare TCP connect otherwise. Returns the HTTP response if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` if the server does not come up in time,
    /// or `AppError::Http` for non-retryable probe failures.
    pub async fn wait_up(
        &self,
        timeout: Duration,
        http: bool,
    ) -> Result<Option<reqwest::Response>> {
        if http {
            backoff::wait_for_http_server(&self.url(), timeout)
                .await
                .map(Some)
        } else {
            backoff::wait_for_server(self.connect_ip(), self.port, timeout).await?;
            Ok(None)
        }
    }

    /// Whether the server currently accepts TCP connections.
    pub async fn is_up(&self) -> bool {
        backoff::can_connect(self.connect_ip(), self.port).await
    }
}
