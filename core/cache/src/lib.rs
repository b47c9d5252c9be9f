//! Response cache for expensive upstream reads.
//!
//! This module provides a get-or-compute cache keyed by a normalized request
//! signature, with TTL expiry, single-flight de-duplication of concurrent
//! misses, glob invalidation and manual warming. Storage is pluggable through
//! [`CacheStore`]; [`MemoryStore`] keeps entries in process memory.
//!
//! # Design Principles
//! - Store failures never fail a read: they degrade to a miss or an unstored result
//! - Only successful computations are cached
//! - Single-flight is guaranteed per process, not across instances

pub mod cache;
pub mod config;
pub mod entry;
pub mod key;
pub mod memory;
pub mod pattern;
pub mod stats;
pub mod store;

pub use cache::{CacheMode, ResponseCache};
pub use config::{CacheConfig, DEFAULT_KEY_PREFIX, DEFAULT_TTL_SECONDS};
pub use entry::CacheEntry;
pub use key::{normalize_path, normalize_query, parse_query, CacheKey, BYPASS_PARAM};
pub use memory::MemoryStore;
pub use pattern::KeyPattern;
pub use stats::CacheStats;
pub use store::CacheStore;
