//! Get-or-compute response cache with single-flight misses.
//!
//! At most one producer runs per key inside a process; concurrent callers for
//! the same key wait on that computation and receive its result, success or
//! failure. Only successes are stored. When the store is shared between
//! instances, de-duplication still only holds within each process.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use stationsync_common::{Clock, Error, Result};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::key::{CacheKey, BYPASS_PARAM};
use crate::pattern::KeyPattern;
use crate::stats::{CacheStats, StatsCounters};
use crate::store::CacheStore;

/// Whether a call may use the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Read a live entry or compute and store.
    #[default]
    Use,
    /// Call the producer directly; neither read nor write the cache.
    Bypass,
}

impl CacheMode {
    /// Interpret a `nocache` flag value.
    pub fn from_flag(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" || v == "1" || v == "yes" => CacheMode::Bypass,
            _ => CacheMode::Use,
        }
    }

    /// Look for the `nocache` flag among query parameters.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        params
            .into_iter()
            .find(|(k, _)| k.as_ref() == BYPASS_PARAM)
            .map(|(_, v)| Self::from_flag(Some(v.as_ref())))
            .unwrap_or_default()
    }
}

/// Result slot shared between a leader and its followers.
type Outcome = Option<Result<Value>>;

struct Flight {
    id: u64,
    result: watch::Receiver<Outcome>,
    invalidated: Arc<AtomicBool>,
}

enum Role {
    Leader {
        id: u64,
        tx: watch::Sender<Outcome>,
        invalidated: Arc<AtomicBool>,
    },
    Follower(watch::Receiver<Outcome>),
}

/// Removes the leader's flight when it finishes or is dropped mid-compute.
struct FlightGuard<'a> {
    flights: &'a Mutex<HashMap<String, Flight>>,
    key: String,
    id: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights.get(&self.key).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.key);
        }
    }
}

/// Generic get-or-compute cache over a [`CacheStore`].
pub struct ResponseCache<S: CacheStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    flights: Mutex<HashMap<String, Flight>>,
    next_flight: AtomicU64,
    stats: StatsCounters,
}

impl<S: CacheStore + ?Sized> ResponseCache<S> {
    /// Create a cache over `store`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
            flights: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
            stats: StatsCounters::default(),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Cache settings.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Key for a logical resource under this cache's prefix.
    pub fn key_for<I, K, V>(&self, resource: &str, params: I) -> CacheKey
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        CacheKey::derive(&self.config.key_prefix, resource, params)
    }

    /// Key for an HTTP read under this cache's prefix.
    pub fn key_for_request(&self, path: &str, raw_query: Option<&str>) -> CacheKey {
        CacheKey::for_request(&self.config.key_prefix, path, raw_query)
    }

    /// Pattern covering every key derived for `resource`.
    pub fn resource_pattern(&self, resource: &str) -> KeyPattern {
        KeyPattern::prefix(&format!("{}:{}:", self.config.key_prefix, resource))
    }

    /// Return the live entry for `key`, or run `producer` once and store its
    /// result.
    ///
    /// Concurrent callers for the same key share a single producer run. A
    /// failed run is returned to every waiter and nothing is stored.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl_seconds: u64,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_or_compute_with(key, ttl_seconds, CacheMode::Use, producer)
            .await
    }

    /// [`Self::get_or_compute`] with an explicit bypass switch.
    pub async fn get_or_compute_with<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl_seconds: u64,
        mode: CacheMode,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if mode == CacheMode::Bypass {
            StatsCounters::bump(&self.stats.bypasses);
            debug!(key = %key, "Cache bypassed");
            return producer().await;
        }

        if let Some(value) = self.read_live::<T>(key).await {
            StatsCounters::bump(&self.stats.hits);
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }
        StatsCounters::bump(&self.stats.misses);

        let mut producer = Some(producer);
        loop {
            match self.join_or_lead(key) {
                Role::Follower(rx) => {
                    StatsCounters::bump(&self.stats.coalesced);
                    debug!(key = %key, "Joining in-flight computation");
                    match Self::wait_for_leader(rx).await {
                        Some(outcome) => return outcome.and_then(decode),
                        // Leader was dropped before finishing; take over.
                        None => continue,
                    }
                }
                Role::Leader {
                    id,
                    tx,
                    invalidated,
                } => {
                    let _guard = FlightGuard {
                        flights: &self.flights,
                        key: key.as_str().to_string(),
                        id,
                    };

                    // A previous leader may have stored the value after our first read.
                    if let Some(value) = self.read_live_value(key).await {
                        if let Ok(data) = serde_json::from_value::<T>(value.clone()) {
                            StatsCounters::bump(&self.stats.hits);
                            let _ = tx.send(Some(Ok(value)));
                            return Ok(data);
                        }
                    }

                    let Some(producer) = producer.take() else {
                        return Err(Error::InvalidInput(
                            "cache producer already consumed".to_string(),
                        ));
                    };

                    StatsCounters::bump(&self.stats.computations);
                    debug!(key = %key, "Cache miss; computing");

                    let outcome = producer()
                        .await
                        .and_then(|data| Ok((serde_json::to_value(&data)?, data)));

                    return match outcome {
                        Ok((value, data)) => {
                            if invalidated.load(Ordering::Acquire) {
                                debug!(key = %key, "Key invalidated during computation; not storing");
                            } else {
                                self.store_value(key, &value, ttl_seconds).await;
                                // An invalidation may have run while the write was in flight.
                                if invalidated.load(Ordering::Acquire) {
                                    self.discard(key).await;
                                }
                            }
                            let _ = tx.send(Some(Ok(value)));
                            Ok(data)
                        }
                        Err(err) => {
                            debug!(key = %key, error = %err, "Computation failed; nothing cached");
                            let _ = tx.send(Some(Err(err.clone())));
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    /// Store `data` under `key` without running a producer.
    ///
    /// # Errors
    /// - `data` cannot be serialized
    /// - The store rejects the write
    pub async fn warm<T: Serialize>(&self, key: &CacheKey, data: &T, ttl_seconds: u64) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.write_entry(key, &value, ttl_seconds).await.map_err(|err| {
            StatsCounters::bump(&self.stats.store_errors);
            err
        })?;
        debug!(key = %key, ttl_seconds, "Cache warmed");
        Ok(())
    }

    /// Remove every entry whose key matches the glob `pattern`.
    ///
    /// Computations already running for matching keys still answer their
    /// waiters but do not store their result. Store failures are logged and
    /// reported as zero removals.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        self.invalidate_pattern(&KeyPattern::new(pattern)).await
    }

    /// Remove every entry derived for `resource`.
    pub async fn invalidate_resource(&self, resource: &str) -> usize {
        let pattern = self.resource_pattern(resource);
        self.invalidate_pattern(&pattern).await
    }

    /// [`Self::invalidate`] with a compiled pattern.
    pub async fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize {
        {
            let flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            for (key, flight) in flights.iter() {
                if pattern.matches(key) {
                    flight.invalidated.store(true, Ordering::Release);
                }
            }
        }

        match self.store.delete_matching(pattern).await {
            Ok(removed) => {
                StatsCounters::add(&self.stats.invalidated, removed as u64);
                info!(pattern = %pattern, removed, "Cache invalidated");
                removed
            }
            Err(err) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(pattern = %pattern, error = %err, "Cache invalidation failed");
                0
            }
        }
    }

    /// Sweep expired entries out of the store.
    ///
    /// Runs after every computed write; failures are logged and reported as
    /// zero removals.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "Purged expired cache entries");
                }
                removed
            }
            Err(err) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(store = self.store.name(), error = %err, "Cache purge failed");
                0
            }
        }
    }

    fn join_or_lead(&self, key: &CacheKey) -> Role {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = flights.get(key.as_str()) {
            return Role::Follower(flight.result.clone());
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let invalidated = Arc::new(AtomicBool::new(false));
        flights.insert(
            key.as_str().to_string(),
            Flight {
                id,
                result: rx,
                invalidated: invalidated.clone(),
            },
        );
        Role::Leader {
            id,
            tx,
            invalidated,
        }
    }

    async fn wait_for_leader(mut rx: watch::Receiver<Outcome>) -> Option<Result<Value>> {
        let outcome = rx.wait_for(Option::is_some).await.ok()?.clone();
        outcome
    }

    async fn read_live<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.read_live_value(key).await?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(key = %key, error = %err, "Cached data has unexpected shape; recomputing");
                None
            }
        }
    }

    async fn read_live_value(&self, key: &CacheKey) -> Option<Value> {
        let blob = match self.store.get(key.as_str()).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(err) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(key = %key, store = self.store.name(), error = %err, "Cache read failed; treating as miss");
                return None;
            }
        };

        let entry: CacheEntry<Value> = match serde_json::from_str(&blob) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key = %key, error = %err, "Discarding unreadable cache entry");
                return None;
            }
        };

        if entry.is_live(self.clock.now()) {
            Some(entry.data)
        } else {
            debug!(key = %key, stored_at = %entry.stored_at, "Cache entry expired");
            None
        }
    }

    async fn store_value(&self, key: &CacheKey, value: &Value, ttl_seconds: u64) {
        if ttl_seconds == 0 {
            return;
        }
        match self.write_entry(key, value, ttl_seconds).await {
            Ok(()) => {
                self.purge_expired().await;
            }
            Err(err) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(key = %key, store = self.store.name(), error = %err, "Cache write failed; returning fresh value");
            }
        }
    }

    async fn discard(&self, key: &CacheKey) {
        match self.store.delete(key.as_str()).await {
            Ok(_) => debug!(key = %key, "Key invalidated during write; entry discarded"),
            Err(err) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(key = %key, store = self.store.name(), error = %err, "Failed to discard invalidated entry");
            }
        }
    }

    async fn write_entry(&self, key: &CacheKey, value: &Value, ttl_seconds: u64) -> Result<()> {
        let entry = CacheEntry::new(value, self.clock.now(), ttl_seconds);
        let blob = serde_json::to_string(&entry)?;
        self.store
            .set(key.as_str(), blob, Duration::from_secs(ttl_seconds))
            .await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
