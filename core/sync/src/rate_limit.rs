//! Interpretation of upstream rate-limit responses.

use std::collections::HashMap;
use std::time::Duration;

use stationsync_common::Error;

use crate::backoff::BackoffPolicy;

/// HTTP status for "too many requests".
pub const TOO_MANY_REQUESTS: u16 = 429;
/// Header carrying the server's requested wait, in seconds.
pub const RETRY_AFTER: &str = "retry-after";

/// Advice on whether and how long to wait before retrying.
///
/// Only advises; the caller decides whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub should_wait: bool,
    /// Explicit server-requested wait; `None` means use backoff.
    pub wait_duration: Option<Duration>,
}

impl RateLimitSignal {
    /// No wait advised.
    pub fn none() -> Self {
        Self {
            should_wait: false,
            wait_duration: None,
        }
    }

    /// Read a status and headers.
    ///
    /// A 429 with a positive integer `Retry-After` yields that many seconds;
    /// a 429 without one asks for backoff.
    pub fn interpret(status: u16, headers: &HashMap<String, String>) -> Self {
        if status != TOO_MANY_REQUESTS {
            return Self::none();
        }

        let retry_after = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(RETRY_AFTER))
            .and_then(|(_, value)| value.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            should_wait: true,
            wait_duration: retry_after,
        }
    }

    /// Advice for an already-classified failure.
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::RateLimited { retry_after } => Self {
                should_wait: true,
                wait_duration: *retry_after,
            },
            err if err.is_retryable() => Self {
                should_wait: true,
                wait_duration: None,
            },
            _ => Self::none(),
        }
    }

    /// Resolve the wait, falling back to `policy` for `attempt`.
    pub fn wait(&self, policy: &BackoffPolicy, attempt: u32) -> Option<Duration> {
        self.should_wait
            .then(|| self.wait_duration.unwrap_or_else(|| policy.compute_delay(attempt)))
    }
}
