//! Station sync engine
//!
//! This module pulls whole collections out of a cursor-paginated, rate-limited
//! upstream and serves them through a response cache:
//! - Sequential page traversal with per-page retry
//! - Exponential backoff and `Retry-After` compliance
//! - Per-traversal job state tracking
//! - Named resources composed over a single-flight cache

pub mod backoff;
pub mod config;
pub mod fetcher;
pub mod orchestrator;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod state;

// Re-export main types
pub use backoff::BackoffPolicy;
pub use config::SyncSettings;
pub use fetcher::{FetchOptions, PageResult, PaginatedFetcher, SyncResult};
pub use orchestrator::SyncOrchestrator;
pub use rate_limit::RateLimitSignal;
pub use registry::{ResourceRegistry, ResourceSpec};
pub use retry::RetryState;
pub use state::{JobPhase, SyncJob};
