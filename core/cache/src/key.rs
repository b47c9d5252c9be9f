//! Deterministic cache key derivation.
//!
//! Keys look like `{prefix}:{resource}:{sorted query}` for orchestrated pulls
//! and `{prefix}:{path}?{sorted query}` for HTTP reads. Parameter order never
//! affects the key.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Query flag that bypasses the cache; never part of a key.
pub const BYPASS_PARAM: &str = "nocache";

/// Unreserved characters stay readable, everything else is escaped so that
/// `&`, `=` and `:` inside values cannot collide with separators.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Signature of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Use a string verbatim as a key.
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a logical resource and its parameters.
    pub fn derive<I, K, V>(prefix: &str, resource: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self(format!("{}:{}:{}", prefix, resource, normalize_query(params)))
    }

    /// Key for an HTTP read from its path and raw query string.
    pub fn for_request(prefix: &str, path: &str, raw_query: Option<&str>) -> Self {
        let query = normalize_query(parse_query(raw_query.unwrap_or_default()));
        let path = normalize_path(path);
        if query.is_empty() {
            Self(format!("{}:{}", prefix, path))
        } else {
            Self(format!("{}:{}?{}", prefix, path, query))
        }
    }

    /// Borrow the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Sorted, escaped `k=v&k=v` form of the parameters, without the bypass flag.
pub fn normalize_query<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .filter(|(k, _)| k.as_ref() != BYPASS_PARAM)
        .map(|(k, v)| {
            (
                utf8_percent_encode(k.as_ref(), COMPONENT).to_string(),
                utf8_percent_encode(v.as_ref(), COMPONENT).to_string(),
            )
        })
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Split a raw query string into decoded pairs.
///
/// `+` decodes to a space; a bare `flag` becomes `("flag", "")`.
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    let decode = |s: &str| {
        let spaced = s.replace('+', " ");
        percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
    };

    raw.trim_start_matches('?')
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(part), String::new()),
        })
        .collect()
}

/// Leading slash, no repeated or trailing slashes.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}
