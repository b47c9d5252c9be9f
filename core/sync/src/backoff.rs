//! Exponential backoff for transient page failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use stationsync_common::{duration_ms, Error, Result};

/// Pure delay schedule: `base_delay * multiplier^attempt`, capped at
/// `max_delay`. No jitter, no state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(with = "duration_ms", default = "default_base_delay")]
    pub base_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    #[serde(with = "duration_ms", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Growth factor per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl BackoffPolicy {
    /// Create a doubling policy.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: default_multiplier(),
        }
    }

    /// Set backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after the failure numbered `attempt` (0-based).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        if capped_ms.is_nan() || capped_ms <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_millis(capped_ms as u64)
        }
    }

    /// Check the policy is usable.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Configuration(format!(
                "Backoff multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::Configuration(
                "Backoff base delay exceeds max delay".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(default_base_delay(), default_max_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60));

        assert_eq!(policy.compute_delay(0), Duration::from_secs(1));
        assert_eq!(policy.compute_delay(1), Duration::from_secs(2));
        assert_eq!(policy.compute_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10))
            .with_multiplier(10.0);

        // 1 * 10^5 = 100000 seconds, but should be capped at 10
        assert_eq!(policy.compute_delay(5), Duration::from_secs(10));
        assert_eq!(policy.compute_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_deterministic() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.compute_delay(3), policy.compute_delay(3));
        assert_eq!(policy.compute_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn test_validate() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(BackoffPolicy::default().with_multiplier(0.5).validate().is_err());
        assert!(BackoffPolicy::default().with_multiplier(f64::NAN).validate().is_err());
        assert!(BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(1))
            .validate()
            .is_err());
    }
}
