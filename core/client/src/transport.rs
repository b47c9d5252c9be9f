//! Transport seam between the fetcher and the remote API.

use async_trait::async_trait;
use std::collections::HashMap;

use stationsync_common::Result;

use crate::request::PageRequest;

/// Status, headers and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Create a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues one page request against the remote collection.
///
/// Implementations return `Ok` for any HTTP response, including error
/// statuses; classification is the fetcher's job. `Err` is reserved for
/// failures where no response arrived (connection errors, timeouts).
#[async_trait]
pub trait PageTransport: Send + Sync {
    /// Send the request and collect the full response.
    async fn send(&self, request: &PageRequest) -> Result<RawResponse>;
}
