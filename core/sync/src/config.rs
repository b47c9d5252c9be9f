//! Aggregate settings for the sync stack.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use stationsync_cache::CacheConfig;
use stationsync_client::ClientConfig;
use stationsync_common::Result;

use crate::backoff::BackoffPolicy;
use crate::fetcher::FetchOptions;
use crate::registry::{ResourceRegistry, ResourceSpec};

/// Everything needed to build a [`crate::SyncOrchestrator`].
///
/// Page size and per-page timeout are taken from `client`
/// (`default_page_size`, `request_timeout`); the same fields in `fetch` are
/// overwritten by [`SyncSettings::fetch_options`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub client: ClientConfig,
    #[serde(default)]
    pub fetch: FetchOptions,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
}

impl SyncSettings {
    /// Settings with defaults for everything but the client.
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            fetch: FetchOptions::default(),
            backoff: BackoffPolicy::default(),
            cache: CacheConfig::default(),
            resources: BTreeMap::new(),
        }
    }

    /// Parse settings from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add a resource.
    pub fn with_resource(mut self, name: impl Into<String>, spec: ResourceSpec) -> Self {
        self.resources.insert(name.into(), spec);
        self
    }

    /// Set fetch options.
    pub fn with_fetch(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    /// Set backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set cache settings.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Fetch options with the client's page size and timeout applied.
    pub fn fetch_options(&self) -> FetchOptions {
        self.fetch
            .clone()
            .with_page_size(self.client.default_page_size)
            .with_page_timeout(self.client.request_timeout)
    }

    /// Check every section.
    ///
    /// # Errors
    /// - Any section is invalid, or a resource name is rejected by the registry
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.backoff.validate()?;
        self.fetch_options().validate()?;
        self.registry().map(|_| ())
    }

    /// Build the resource registry.
    pub fn registry(&self) -> Result<ResourceRegistry> {
        let mut registry = ResourceRegistry::new();
        for (name, spec) in &self.resources {
            registry.register(name.clone(), spec.clone())?;
        }
        Ok(registry)
    }
}
