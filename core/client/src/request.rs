//! Page request construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cursor::{PageCursor, OFFSET_PARAM};

/// Query parameter carrying the page size.
pub const SIZE_PARAM: &str = "size";
/// Always sent so rows come back keyed by field name instead of field id.
pub const USER_FIELD_NAMES_PARAM: &str = "user_field_names";

/// The parts of a page request that stay fixed across a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplate {
    /// Collection path relative to the API root.
    pub collection_path: String,
    /// Caller filters, ordering, etc.
    pub params: BTreeMap<String, String>,
}

impl RequestTemplate {
    /// Template for a collection with no extra parameters.
    pub fn new(collection_path: impl Into<String>) -> Self {
        Self {
            collection_path: collection_path.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add several query parameters.
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Build the request for the page at `cursor`.
    ///
    /// Paging parameters always win over same-named template parameters.
    pub fn page(&self, page_size: u32, cursor: &PageCursor) -> PageRequest {
        let mut params = self.params.clone();
        params.remove(OFFSET_PARAM);
        params.insert(SIZE_PARAM.to_string(), page_size.to_string());
        params.insert(USER_FIELD_NAMES_PARAM.to_string(), "true".to_string());
        if let Some(token) = cursor.token() {
            params.insert(OFFSET_PARAM.to_string(), token.to_string());
        }

        PageRequest {
            collection_path: self.collection_path.clone(),
            params,
        }
    }
}

/// A single, fully-resolved page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub collection_path: String,
    pub params: BTreeMap<String, String>,
}

impl PageRequest {
    /// The offset token, if this is not the first page.
    pub fn offset(&self) -> Option<&str> {
        self.params.get(OFFSET_PARAM).map(String::as_str)
    }

    /// Requested page size.
    pub fn page_size(&self) -> Option<u32> {
        self.params.get(SIZE_PARAM).and_then(|s| s.parse().ok())
    }

    /// Query pairs in a stable order.
    pub fn query_pairs(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}
