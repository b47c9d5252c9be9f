//! Common utilities and types shared across the station sync crates.
//!
//! This module provides foundational types that are used throughout the codebase:
//! the error taxonomy, the opaque [`Row`] record, secrets, and the [`Clock`]
//! abstraction used for backoff waits and cache expiry.

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result, UPSTREAM_UNAVAILABLE};
pub use types::{duration_ms, json_kind, Credential, Row};
