//! Compatibility check between the hub and the servers it spawns.

use tracing::{debug, warn};

/// Response header carrying a single-user server's version.
pub const VERSION_HEADER: &str = "X-Hub-Version";

/// Version of this hub build.
pub const HUB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outcome of comparing two version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Identical versions.
    Exact,
    /// Same major.minor, different patch level.
    PatchDiffers,
    /// Major or minor versions differ.
    Mismatch,
    /// The server did not report a version.
    Unknown,
}

fn major_minor(version: &str) -> (&str, &str) {
    let mut parts = version.split('.');
    (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
}

/// Compare the hub version against the one a server reported.
#[must_use]
pub fn compare(hub_version: &str, server_version: Option<&str>) -> Compatibility {
    match server_version {
        None => Compatibility::Unknown,
        Some(server) if server == hub_version => Compatibility::Exact,
        Some(server) if major_minor(server) == major_minor(hub_version) => {
            Compatibility::PatchDiffers
        }
        Some(_) => Compatibility::Mismatch,
    }
}

/// Log how compatible a server's version is with the hub. Never fails.
pub fn check_version(hub_version: &str, server_version: Option<&str>) -> Compatibility {
    let result = compare(hub_version, server_version);
    match result {
        Compatibility::Unknown => {
            warn!(hub_version, "version of single-user server unspecified");
        }
        Compatibility::Mismatch => {
            warn!(
                hub_version,
                server_version = server_version.unwrap_or_default(),
                "single-user server version does not match hub version"
            );
        }
        Compatibility::PatchDiffers => {
            debug!(
                hub_version,
                server_version = server_version.unwrap_or_default(),
                "single-user server patch version differs from hub"
            );
        }
        Compatibility::Exact => {}
    }
    result
}
