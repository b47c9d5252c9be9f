//! Named resources and the collections behind them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use stationsync_client::RequestTemplate;
use stationsync_common::{Error, Result};

/// A logical resource served from one upstream collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Collection path relative to the API root.
    pub collection_path: String,
    /// Parameters sent on every page request for this resource.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Row floor used for the completion sanity check.
    #[serde(default)]
    pub expected_min_rows: Option<usize>,
    /// TTL for cached pulls; falls back to the cache default.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl ResourceSpec {
    /// Resource backed by `collection_path` with no extra settings.
    pub fn new(collection_path: impl Into<String>) -> Self {
        Self {
            collection_path: collection_path.into(),
            params: BTreeMap::new(),
            expected_min_rows: None,
            ttl_seconds: None,
        }
    }

    /// Add a fixed request parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the row floor.
    pub fn with_expected_min_rows(mut self, rows: usize) -> Self {
        self.expected_min_rows = Some(rows);
        self
    }

    /// Set the cache TTL.
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Request template for this resource.
    pub fn template(&self) -> RequestTemplate {
        RequestTemplate::new(self.collection_path.clone()).with_params(self.params.clone())
    }
}

/// Registry mapping resource names to their upstream collections.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, ResourceSpec>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource.
    ///
    /// # Preconditions
    /// - `name` must be unique within the registry
    ///
    /// # Errors
    /// - Name is empty or contains `:` (the cache key separator)
    /// - Name is already registered
    pub fn register(&mut self, name: impl Into<String>, spec: ResourceSpec) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name.contains(':') {
            return Err(Error::Configuration(format!(
                "Invalid resource name '{}'",
                name
            )));
        }
        if self.resources.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "Resource '{}' is already registered",
                name
            )));
        }
        self.resources.insert(name, spec);
        Ok(())
    }

    /// Look up a resource by name.
    ///
    /// # Errors
    /// - Resource is not registered
    pub fn resolve(&self, name: &str) -> Result<&ResourceSpec> {
        self.resources
            .get(name)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown resource '{}'", name)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a resource is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }
}
