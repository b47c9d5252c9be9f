//! In-process cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use stationsync_common::{Clock, Result, SystemClock};

use crate::pattern::KeyPattern;
use crate::store::CacheStore;

#[derive(Debug, Clone)]
struct Slot {
    blob: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory cache store.
///
/// Holds blobs in a map guarded by a lock; expired slots are dropped lazily on
/// read or in bulk by [`CacheStore::purge_expired`]. Contents are lost on
/// drop.
pub struct MemoryStore {
    slots: RwLock<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of slots held, expired or not.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expiry_for(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        self.clock.now().checked_add_signed(ttl)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(key) {
                None => return Ok(None),
                Some(slot) if !slot.is_expired(now) => return Ok(Some(slot.blob.clone())),
                Some(_) => {}
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            slots.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, blob: String, ttl: Duration) -> Result<()> {
        let slot = Slot {
            blob,
            expires_at: self.expiry_for(ttl),
        };
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|key, _| !pattern.matches(key));
        Ok(before - slots.len())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_expired(now));
        Ok(before - slots.len())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationsync_common::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (_, store) = store();
        store.set("k", "v".to_string(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_expired_slot_evicted_on_read() {
        let (clock, store) = store();
        store.set("k", "v".to_string(), Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, store) = store();
        store.set("short", "1".to_string(), Duration::from_secs(1)).await.unwrap();
        store.set("long", "2".to_string(), Duration::from_secs(60)).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.keys().await.unwrap(), vec!["long".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let (_, store) = store();
        for key in ["api:stations:/a", "api:stations:/b", "api:prices:/a"] {
            store.set(key, "x".to_string(), Duration::from_secs(60)).await.unwrap();
        }

        let removed = store
            .delete_matching(&KeyPattern::new("api:stations:*"))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.keys().await.unwrap(), vec!["api:prices:/a".to_string()]);
        assert!(store.delete("api:prices:/a").await.unwrap());
        assert!(!store.delete("api:prices:/a").await.unwrap());
    }
}
