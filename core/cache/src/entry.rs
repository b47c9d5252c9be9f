//! Stored cache record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with its freshness window.
///
/// Serialized as `{ "data", "storedAt", "ttlSeconds" }`. Entries are never
/// mutated; a refresh replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl<T> CacheEntry<T> {
    /// Create an entry stored at `now`.
    pub fn new(data: T, stored_at: DateTime<Utc>, ttl_seconds: u64) -> Self {
        Self {
            data,
            stored_at,
            ttl_seconds,
        }
    }

    /// Instant after which the entry is stale.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl_ms = i64::try_from(self.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        Duration::try_milliseconds(ttl_ms)
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Valid iff `now - stored_at < ttl_seconds * 1000` milliseconds.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_liveness_boundary() {
        let stored = Utc::now();
        let entry = CacheEntry::new(1, stored, 1);

        assert!(entry.is_live(stored));
        assert!(entry.is_live(stored + Duration::milliseconds(999)));
        assert!(!entry.is_live(stored + Duration::milliseconds(1000)));
    }

    #[test]
    fn test_zero_ttl_is_never_live() {
        let stored = Utc::now();
        assert!(!CacheEntry::new("x", stored, 0).is_live(stored));
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let entry = CacheEntry::new((), Utc::now(), u64::MAX);
        assert!(entry.is_live(Utc::now()));
    }

    #[test]
    fn test_wire_format_field_names() {
        let entry = CacheEntry::new(json!([1, 2]), Utc::now(), 60);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["data"], json!([1, 2]));
        assert_eq!(value["ttlSeconds"], json!(60));
        assert!(value["storedAt"].is_string());
    }
}
