//! Exponential backoff polling and the TCP / HTTP readiness probes built on it.
//!
//! Delays start at 100ms and double after every unsuccessful probe, never
//! exceeding 5s nor the time left in the overall budget. Once the budget is
//! spent the poll fails with [`AppError::Timeout`].

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::{AppError, Result};

/// First delay between probes.
pub const DT_MIN: Duration = Duration::from_millis(100);
/// Growth factor applied to the delay after each failed probe.
pub const DT_SCALE: u32 = 2;
/// Upper bound for a single delay.
pub const DT_MAX: Duration = Duration::from_secs(5);

/// Per-request timeout for the HTTP probe.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Outcome of a single readiness probe.
#[derive(Debug)]
pub enum Probe<T> {
    /// The target is ready; polling stops and returns the value.
    Ready(T),
    /// Not ready yet; poll again after the current delay.
    NotReady,
}

/// Delay to use after `current`, given how much of the budget is left.
///
/// Returns [`Duration::ZERO`] once the budget is exhausted.
#[must_use]
pub fn next_delay(current: Duration, elapsed: Duration, timeout: Duration) -> Duration {
    let remaining = timeout.saturating_sub(elapsed);
    (current * DT_SCALE).min(DT_MAX).min(remaining)
}

/// Run `probe` until it reports ready or `timeout` elapses.
///
/// `what` names the target in the timeout message.
///
/// # Errors
///
/// Returns `AppError::Timeout` when the budget runs out, or whatever error
/// the probe itself returns (probe errors are not retried).
pub async fn poll_until_ready<T, F, Fut>(mut probe: F, timeout: Duration, what: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let started = Instant::now();
    let mut delay = DT_MIN;
    while !delay.is_zero() {
        if let Probe::Ready(value) = probe().await? {
            return Ok(value);
        }
        tokio::time::sleep(delay).await;
        delay = next_delay(delay, started.elapsed(), timeout);
    }
    Err(AppError::Timeout(format!(
        "{what} didn't respond in {} seconds",
        timeout.as_secs_f64()
    )))
}

/// Rewrite "all interfaces" addresses to loopback so they can be dialed.
#[must_use]
pub fn connectable_ip(ip: &str) -> &str {
    if ip.is_empty() || ip == "0.0.0.0" {
        "127.0.0.1"
    } else {
        ip
    }
}

/// Check whether a TCP connection to `ip:port` can be established.
///
/// Refused and timed-out connections are expected while a server boots;
/// anything else is logged but still reported as "not connectable".
pub async fn can_connect(ip: &str, port: u16) -> bool {
    let ip = connectable_ip(ip);
    match TcpStream::connect((ip, port)).await {
        Ok(_) => true,
        Err(err) => {
            if !matches!(
                err.kind(),
                ErrorKind::ConnectionRefused | ErrorKind::TimedOut
            ) {
                error!(ip, port, %err, "unexpected error connecting");
            }
            false
        }
    }
}

/// Wait for any server to accept TCP connections at `ip:port`.
///
/// # Errors
///
/// Returns `AppError::Timeout` if nothing is listening within `timeout`.
pub async fn wait_for_server(ip: &str, port: u16, timeout: Duration) -> Result<()> {
    let ip = connectable_ip(ip);
    poll_until_ready(
        || async move {
            if can_connect(ip, port).await {
                Ok(Probe::Ready(()))
            } else {
                Ok(Probe::NotReady)
            }
        },
        timeout,
        &format!("Server at {ip}:{port}"),
    )
    .await
}

/// Build the client used by the HTTP probe: redirects are never followed.
///
/// # Errors
///
/// Returns `AppError::Http` if the TLS backend cannot be initialised.
pub fn probe_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|err| AppError::Http(format!("failed to build http client: {err}")))
}

/// Issue one GET against `url` and classify the result.
///
/// Any status below 500 (404 included) means ready. 5xx responses and
/// connection-level failures mean "retry". Other client errors, such as a
/// malformed URL, are returned immediately.
///
/// # Errors
///
/// Returns `AppError::Http` for non-retryable request failures.
pub async fn http_probe(client: &reqwest::Client, url: &str) -> Result<Probe<reqwest::Response>> {
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_server_error() => {
            warn!(url, status = resp.status().as_u16(), "server responded with error");
            Ok(Probe::NotReady)
        }
        Ok(resp) => {
            debug!(url, status = resp.status().as_u16(), "server responded");
            Ok(Probe::Ready(resp))
        }
        Err(err) if err.is_connect() || err.is_timeout() => Ok(Probe::NotReady),
        Err(err) if err.is_request() && !err.is_builder() => {
            warn!(url, %err, "failed to connect");
            Ok(Probe::NotReady)
        }
        Err(err) => Err(AppError::Http(format!("request to {url} failed: {err}"))),
    }
}

/// Wait for an HTTP server to answer at `url` with any non-5xx status.
///
/// # Errors
///
/// Returns `AppError::Timeout` when the budget runs out, or `AppError::Http`
/// for failures that retrying cannot fix.
pub async fn wait_for_http_server(url: &str, timeout: Duration) -> Result<reqwest::Response> {
    let client = probe_client()?;
    poll_until_ready(
        || http_probe(&client, url),
        timeout,
        &format!("Server at {url}"),
    )
    .await
}
