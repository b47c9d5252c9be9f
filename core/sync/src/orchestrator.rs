//! Entry point for route handlers: cached full pulls over the fetcher.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use stationsync_cache::{parse_query, CacheKey, CacheMode, CacheStats, CacheStore, ResponseCache, BYPASS_PARAM};
use stationsync_client::{PageCursor, PageTransport};
use stationsync_common::{Clock, Result};

use crate::config::SyncSettings;
use crate::fetcher::{FetchOptions, PageResult, PaginatedFetcher, SyncResult};
use crate::registry::{ResourceRegistry, ResourceSpec};

/// Composes [`ResponseCache`] over [`PaginatedFetcher`] for named resources.
pub struct SyncOrchestrator<T: PageTransport + ?Sized, S: CacheStore + ?Sized> {
    fetcher: PaginatedFetcher<T>,
    cache: ResponseCache<S>,
    resources: ResourceRegistry,
    options: FetchOptions,
}

impl<T, S> SyncOrchestrator<T, S>
where
    T: PageTransport + ?Sized,
    S: CacheStore + ?Sized,
{
    /// Build an orchestrator from validated settings.
    ///
    /// # Errors
    /// - Any section of `settings` is invalid
    pub fn new(
        transport: Arc<T>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        settings: &SyncSettings,
    ) -> Result<Self> {
        settings.validate()?;

        Ok(Self {
            fetcher: PaginatedFetcher::new(transport, settings.backoff.clone(), clock.clone()),
            cache: ResponseCache::new(store, clock, settings.cache.clone()),
            resources: settings.registry()?,
            options: settings.fetch_options(),
        })
    }

    /// The fetcher used on cache misses.
    pub fn fetcher(&self) -> &PaginatedFetcher<T> {
        &self.fetcher
    }

    /// The response cache.
    pub fn cache(&self) -> &ResponseCache<S> {
        &self.cache
    }

    /// Registered resources.
    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Fetch options applied to every traversal.
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Cache counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Every row of `resource` filtered by `params`, served from cache while
    /// live.
    pub async fn fetch_all_cached(
        &self,
        resource: &str,
        params: &BTreeMap<String, String>,
        ttl_seconds: u64,
    ) -> Result<SyncResult> {
        self.fetch_all(resource, params, ttl_seconds, CacheMode::Use).await
    }

    /// Every row of `resource`, pulled fresh without touching the cache.
    pub async fn fetch_all_fresh(
        &self,
        resource: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<SyncResult> {
        self.fetch_all(resource, params, 0, CacheMode::Bypass).await
    }

    /// Full pull of `resource` with an explicit cache mode.
    ///
    /// # Errors
    /// - `InvalidInput` for an unknown resource
    /// - `Sync` when the traversal fails; nothing is cached in that case
    pub async fn fetch_all(
        &self,
        resource: &str,
        params: &BTreeMap<String, String>,
        ttl_seconds: u64,
        mode: CacheMode,
    ) -> Result<SyncResult> {
        let spec = self.resources.resolve(resource)?;
        let template = spec.template().with_params(upstream_params(params));
        let options = self.options_for(spec);
        let key = self.key_for(resource, params);

        self.cache
            .get_or_compute_with(&key, ttl_seconds, mode, move || async move {
                self.fetcher.fetch_all_with(&template, &options).await
            })
            .await
    }

    /// Full pull for an incoming route query string.
    ///
    /// Honors the `nocache` flag and uses the resource's TTL.
    pub async fn fetch_for_route(&self, resource: &str, raw_query: Option<&str>) -> Result<SyncResult> {
        let pairs = raw_query.map(parse_query).unwrap_or_default();
        let mode = CacheMode::from_params(pairs.iter().map(|(k, v)| (k, v)));
        let params: BTreeMap<String, String> = pairs.into_iter().collect();
        let ttl_seconds = self.ttl_for(resource)?;

        self.fetch_all(resource, &params, ttl_seconds, mode).await
    }

    /// One page of `resource` at `cursor`. Never cached.
    pub async fn fetch_page(
        &self,
        resource: &str,
        params: &BTreeMap<String, String>,
        cursor: &PageCursor,
    ) -> Result<PageResult> {
        let spec = self.resources.resolve(resource)?;
        let template = spec.template().with_params(upstream_params(params));
        self.fetcher
            .fetch_page(&template, cursor, &self.options_for(spec))
            .await
    }

    /// Drop every cached pull of `resource`; call after a mutation.
    ///
    /// # Returns
    /// Number of entries removed.
    pub async fn invalidate(&self, resource: &str) -> usize {
        let removed = self.cache.invalidate_resource(resource).await;
        info!("Invalidated {} cached pull(s) of '{}'", removed, resource);
        removed
    }

    /// Store an externally produced result for `resource`.
    pub async fn warm(
        &self,
        resource: &str,
        params: &BTreeMap<String, String>,
        result: &SyncResult,
        ttl_seconds: u64,
    ) -> Result<()> {
        self.resources.resolve(resource)?;
        let key = self.key_for(resource, params);
        self.cache.warm(&key, result, ttl_seconds).await
    }

    /// Cache key for a pull of `resource` with `params`.
    pub fn key_for(&self, resource: &str, params: &BTreeMap<String, String>) -> CacheKey {
        self.cache.key_for(resource, params.iter())
    }

    /// TTL for `resource`: its own setting or the cache default.
    pub fn ttl_for(&self, resource: &str) -> Result<u64> {
        let spec = self.resources.resolve(resource)?;
        Ok(spec
            .ttl_seconds
            .unwrap_or(self.cache.config().default_ttl_seconds))
    }

    fn options_for(&self, spec: &ResourceSpec) -> FetchOptions {
        let floor = spec.expected_min_rows.or(self.options.expected_min_rows);
        self.options.clone().with_expected_min_rows(floor)
    }
}

/// Caller parameters minus the cache bypass flag.
fn upstream_params(params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    params
        .iter()
        .filter(|(k, _)| k.as_str() != BYPASS_PARAM)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationsync_cache::MemoryStore;
    use stationsync_client::{ClientConfig, ScriptedTransport};
    use stationsync_common::{Credential, ManualClock};

    fn settings() -> SyncSettings {
        SyncSettings::new(
            ClientConfig::new("https://upstream.test/api", Credential::new("tok"))
                .with_default_page_size(10),
        )
        .with_resource(
            "stations",
            ResourceSpec::new("database/rows/table/1/").with_ttl(120),
        )
        .with_resource("regions", ResourceSpec::new("database/rows/table/2/"))
    }

    fn orchestrator(
        rows: usize,
    ) -> (
        SyncOrchestrator<ScriptedTransport, MemoryStore>,
        Arc<ScriptedTransport>,
    ) {
        let clock = Arc::new(ManualClock::default());
        let transport = Arc::new(ScriptedTransport::with_row_count(rows));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let orchestrator =
            SyncOrchestrator::new(transport.clone(), store, clock, &settings()).unwrap();
        (orchestrator, transport)
    }

    #[test]
    fn test_ttl_for() {
        let (orchestrator, _) = orchestrator(0);
        assert_eq!(orchestrator.ttl_for("stations").unwrap(), 120);
        assert_eq!(orchestrator.ttl_for("regions").unwrap(), 300);
        assert!(orchestrator.ttl_for("unknown").is_err());
    }

    #[test]
    fn test_key_ignores_param_order_and_bypass_flag() {
        let (orchestrator, _) = orchestrator(0);
        let a: BTreeMap<String, String> = [("city", "Berlin"), ("type", "fast")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut b = a.clone();
        b.insert(BYPASS_PARAM.to_string(), "true".to_string());

        assert_eq!(orchestrator.key_for("stations", &a), orchestrator.key_for("stations", &b));
        assert_eq!(
            orchestrator.key_for("stations", &a).as_str(),
            "api:stations:city=Berlin&type=fast"
        );
    }

    #[tokio::test]
    async fn test_route_nocache_flag_bypasses() {
        let (orchestrator, transport) = orchestrator(5);

        orchestrator.fetch_for_route("stations", Some("city=Berlin")).await.unwrap();
        orchestrator.fetch_for_route("stations", Some("city=Berlin")).await.unwrap();
        assert_eq!(transport.requests().len(), 1);

        orchestrator
            .fetch_for_route("stations", Some("nocache=true&city=Berlin"))
            .await
            .unwrap();
        assert_eq!(transport.requests().len(), 2);
        // The flag is never forwarded upstream
        assert!(transport
            .requests()
            .iter()
            .all(|r| !r.params.contains_key(BYPASS_PARAM)));
        assert_eq!(orchestrator.stats().bypasses, 1);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_invalid_input() {
        let (orchestrator, transport) = orchestrator(5);
        let err = orchestrator
            .fetch_all_cached("nope", &BTreeMap::new(), 60)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert!(transport.requests().is_empty());
    }
}
