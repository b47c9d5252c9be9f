//! Common error types for the station sync stack.

use std::time::Duration;
use thiserror::Error;

/// Generic message returned to untrusted callers when an upstream pull fails.
pub const UPSTREAM_UNAVAILABLE: &str = "The station directory is temporarily unavailable";

/// Top-level error type for sync and cache operations.
///
/// Every variant is cheap to clone so that a single failed computation can be
/// handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Connection to the upstream failed before a response arrived.
    #[error("Network error: {0}")]
    Network(String),

    /// A single request exceeded its time budget.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with a 5xx status.
    #[error("Upstream server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Upstream answered with 429.
    #[error("Rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Upstream answered with a 4xx status other than 429.
    #[error("Upstream rejected request (status {status}): {message}")]
    Client { status: u16, message: String },

    /// Response body did not have the expected page shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A full traversal was aborted.
    ///
    /// Only the number of pages reached is kept; rows fetched before the
    /// failure are discarded.
    #[error("Sync failed after {pages_completed} page(s): {message}")]
    Sync {
        message: String,
        pages_completed: u32,
        #[source]
        cause: Box<Error>,
    },

    /// The backing cache store could not be read or written.
    #[error("Cache store error: {0}")]
    CacheStore(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Settings are missing or inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation was attempted from a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Wrap a page-level failure into the terminal traversal error.
    pub fn sync_failure(pages_completed: u32, cause: Error) -> Self {
        let message = match &cause {
            Error::Client { status, .. } => format!("upstream rejected page request ({})", status),
            Error::MalformedResponse(_) => "upstream returned a malformed page".to_string(),
            _ if cause.is_retryable() => "page retry budget exhausted".to_string(),
            _ => "page fetch failed".to_string(),
        };
        Error::Sync {
            message,
            pages_completed,
            cause: Box::new(cause),
        }
    }

    /// Whether the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::Server { .. } | Error::RateLimited { .. }
        )
    }

    /// The innermost failure, skipping `Sync` wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Sync { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Status code the route layer should answer with.
    ///
    /// Upstream failures are never the caller's fault, so they map to 502.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::Configuration(_)
            | Error::Serialization(_)
            | Error::CacheStore(_)
            | Error::InvalidState(_) => 500,
            _ => 502,
        }
    }

    /// Message that is safe to return to untrusted callers.
    pub fn public_message(&self) -> String {
        match self {
            Error::InvalidInput(msg) => msg.clone(),
            Error::Configuration(_)
            | Error::Serialization(_)
            | Error::CacheStore(_)
            | Error::InvalidState(_) => "Internal server error".to_string(),
            _ => UPSTREAM_UNAVAILABLE.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
