//! Per-page retry bookkeeping.

/// Attempts made for one page request.
///
/// Lives only for a single page fetch and is dropped once that fetch succeeds
/// or runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
}

impl RetryState {
    /// Allow the initial attempt plus `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_retries.saturating_add(1),
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record a failed attempt.
    ///
    /// # Returns
    /// Whether another attempt is allowed.
    pub fn record_failure(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        !self.is_exhausted()
    }

    /// Whether every allowed attempt has failed.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Backoff index for the next wait (0 after the first failure).
    pub fn backoff_index(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }
}
