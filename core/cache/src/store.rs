//! Cache store trait definition.

use async_trait::async_trait;
use std::time::Duration;

use stationsync_common::Result;

use crate::pattern::KeyPattern;

/// Backing store for serialized cache entries.
///
/// Values are opaque JSON blobs; freshness is decided by the cache, not the
/// store. `ttl` is passed as a hint so stores with native expiry can evict on
/// their own. Implementations may be process-local or shared between
/// instances.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the store name (e.g., "memory", "redis").
    fn name(&self) -> &str;

    /// Read a blob.
    ///
    /// # Returns
    /// `None` when the key is absent or the store already evicted it.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a blob, replacing any previous value.
    async fn set(&self, key: &str, blob: String, ttl: Duration) -> Result<()>;

    /// Remove one key.
    ///
    /// # Returns
    /// Whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key matching `pattern`.
    ///
    /// # Returns
    /// Number of keys removed.
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize>;

    /// Every key currently held.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Drop entries whose TTL has elapsed.
    ///
    /// Stores with native expiry can keep the default.
    ///
    /// # Returns
    /// Number of entries removed.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
