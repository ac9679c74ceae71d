//! URL path helpers and server-name allocation.

use std::collections::HashSet;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left untouched when escaping a user name: unreserved URL
/// characters plus `@`.
const NAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'@');

/// Escape a user name for use in URLs, cookies and OAuth client ids.
#[must_use]
pub fn escape_name(name: &str) -> String {
    utf8_percent_encode(name, NAME_SAFE).to_string()
}

/// Join URL path pieces without doubling slashes.
///
/// A leading slash on the first piece and a trailing slash on the last piece
/// are preserved.
#[must_use]
pub fn url_path_join(pieces: &[&str]) -> String {
    let initial = pieces.first().is_some_and(|p| p.starts_with('/'));
    let trailing = pieces.last().is_some_and(|p| p.ends_with('/'));
    let joined = pieces
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let mut result = String::with_capacity(joined.len() + 2);
    if initial {
        result.push('/');
    }
    result.push_str(&joined);
    if trailing && !result.ends_with('/') {
        result.push('/');
    }
    result
}

/// Lowest positive integer, as a string, not already used as a server name.
///
/// With `n` existing names at least one of `1..=n+1` is free, so the search
/// always terminates.
#[must_use]
pub fn default_server_name<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: HashSet<&str> = existing.into_iter().collect();
    (1..)
        .map(|n: usize| n.to_string())
        .find(|name| !taken.contains(name.as_str()))
        .unwrap_or_default()
}
