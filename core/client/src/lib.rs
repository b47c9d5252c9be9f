//! Client for the hosted database's cursor-paginated row API.
//!
//! This crate knows how to build page requests, move a [`PageCursor`] along
//! `next` references, validate page bodies, and send requests through a
//! [`PageTransport`]. Retry and traversal policy live in `stationsync-sync`.

pub mod config;
pub mod cursor;
pub mod http;
pub mod payload;
pub mod request;
pub mod scripted;
pub mod transport;

pub use config::{ClientConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use cursor::{CursorWarning, PageCursor};
pub use http::HttpTransport;
pub use payload::{error_message, PagePayload};
pub use request::{PageRequest, RequestTemplate};
pub use scripted::{Fault, ScriptedTransport};
pub use transport::{PageTransport, RawResponse};
