//! Remote API client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use stationsync_common::{duration_ms, Credential, Error, Result};

/// Default number of rows requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Upper bound the upstream accepts for `size`.
pub const MAX_PAGE_SIZE: u32 = 200;
/// Default per-request time budget.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the hosted database API.
///
/// Passed explicitly to the transport and orchestrator; nothing in the client
/// reads process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.baserow.io/api`.
    pub base_url: String,
    /// Database token sent as `Authorization: Token {credential}`.
    #[serde(skip_serializing)]
    pub credential: Credential,
    /// Rows per page when the caller does not choose.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Time budget for a single page request.
    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,
    /// User agent header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_user_agent() -> String {
    format!("stationsync/{}", env!("CARGO_PKG_VERSION"))
}

impl ClientConfig {
    /// Create a configuration with default paging and timeout.
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            base_url: base_url.into(),
            credential,
            default_page_size: DEFAULT_PAGE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: default_user_agent(),
        }
    }

    /// Set the default page size.
    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check the configuration before it is used.
    ///
    /// # Errors
    /// - Base URL does not parse or is not http(s)
    /// - Page size outside `1..=MAX_PAGE_SIZE`
    /// - Zero timeout
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::Configuration(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Configuration(format!(
                "Base URL must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.default_page_size == 0 || self.default_page_size > MAX_PAGE_SIZE {
            return Err(Error::Configuration(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.default_page_size
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Configuration("Request timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Absolute URL of a collection.
    pub fn collection_url(&self, collection_path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            collection_path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| Error::InvalidInput(format!("Invalid collection URL '{}': {}", joined, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new("https://api.example.com/api/", Credential::new("tok"))
    }

    #[test]
    fn test_collection_url_joins_cleanly() {
        let url = config().collection_url("/database/rows/table/42/").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/api/database/rows/table/42/");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(config().validate().is_ok());
        assert!(config().with_default_page_size(0).validate().is_err());
        assert!(config().with_default_page_size(MAX_PAGE_SIZE + 1).validate().is_err());
        assert!(config().with_request_timeout(Duration::ZERO).validate().is_err());

        let mut ftp = config();
        ftp.base_url = "ftp://example.com".to_string();
        assert!(ftp.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url": "https://api.example.com", "credential": "abc"}"#,
        )
        .unwrap();

        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.credential.expose(), "abc");
    }
}
