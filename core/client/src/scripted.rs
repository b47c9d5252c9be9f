//! In-memory upstream for tests and demos.
//!
//! Serves a fixed row set with the same `{ results, count, next, previous }`
//! shape and numeric `offset` tokens as the hosted API, records every request,
//! and can be told to fail specific pages.

use async_trait::async_trait;
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use stationsync_common::{Error, Result, Row};

use crate::request::PageRequest;
use crate::transport::{PageTransport, RawResponse};

/// A canned failure for one page.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Answer with this response instead of the page.
    Respond(RawResponse),
    /// Fail as if the connection dropped.
    Network(String),
    /// Fail as if the request timed out.
    Timeout,
}

impl Fault {
    /// 5xx with an empty body.
    pub fn server_error(status: u16) -> Self {
        Fault::Respond(RawResponse::new(status, Vec::new()))
    }

    /// 429, optionally with `Retry-After`.
    pub fn rate_limited(retry_after: Option<&str>) -> Self {
        let response = RawResponse::new(429, br#"{"detail": "Too many requests"}"#.to_vec());
        Fault::Respond(match retry_after {
            Some(value) => response.with_header("Retry-After", value),
            None => response,
        })
    }
}

#[derive(Debug)]
struct ScheduledFault {
    fault: Fault,
    remaining: Option<usize>,
}

/// Scripted, in-memory implementation of [`PageTransport`].
pub struct ScriptedTransport {
    base_url: String,
    rows: Vec<Row>,
    faults: Mutex<HashMap<Option<String>, ScheduledFault>>,
    requests: Mutex<Vec<PageRequest>>,
    yielding: bool,
}

impl ScriptedTransport {
    /// Serve the given rows.
    pub fn new(base_url: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            base_url: base_url.into(),
            rows,
            faults: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            yielding: false,
        }
    }

    /// Suspend once per request before answering, so concurrent callers
    /// interleave the way they would against a real upstream.
    pub fn yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    /// Serve `count` generated rows with ids `1..=count`.
    pub fn with_row_count(count: usize) -> Self {
        let rows = (1..=count)
            .map(|id| {
                let mut fields = Map::new();
                fields.insert("id".to_string(), json!(id));
                fields.insert("name".to_string(), json!(format!("Station {}", id)));
                Row::new(fields)
            })
            .collect();
        Self::new("https://upstream.test/api", rows)
    }

    /// Fail the page at `offset` (None = first page) the next `times` times.
    pub fn fail_times(&self, offset: Option<&str>, fault: Fault, times: usize) {
        self.schedule(offset, fault, Some(times));
    }

    /// Fail the page at `offset` on every request.
    pub fn fail_always(&self, offset: Option<&str>, fault: Fault) {
        self.schedule(offset, fault, None);
    }

    fn schedule(&self, offset: Option<&str>, fault: Fault, remaining: Option<usize>) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(offset.map(String::from), ScheduledFault { fault, remaining });
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Offsets of every request received so far, in order.
    pub fn requested_offsets(&self) -> Vec<Option<String>> {
        self.requests()
            .iter()
            .map(|r| r.offset().map(String::from))
            .collect()
    }

    fn take_fault(&self, offset: Option<&str>) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let key = offset.map(String::from);
        let scheduled = faults.get_mut(&key)?;
        let fault = scheduled.fault.clone();
        match scheduled.remaining.as_mut() {
            None => {}
            Some(0) => {
                faults.remove(&key);
                return None;
            }
            Some(1) => {
                faults.remove(&key);
            }
            Some(n) => *n -= 1,
        }
        Some(fault)
    }

    fn serve_page(&self, request: &PageRequest) -> RawResponse {
        let offset = match request.offset().map(str::parse::<usize>) {
            None => 0,
            Some(Ok(offset)) => offset,
            Some(Err(_)) => {
                return RawResponse::new(400, br#"{"detail": "Invalid offset."}"#.to_vec())
            }
        };
        let size = request.page_size().unwrap_or(100).max(1) as usize;
        let end = (offset + size).min(self.rows.len());
        let results = self.rows.get(offset..end).unwrap_or_default();

        let page_url = |at: usize| {
            format!(
                "{}/{}?offset={}&size={}&user_field_names=true",
                self.base_url.trim_end_matches('/'),
                request.collection_path.trim_start_matches('/'),
                at,
                size
            )
        };
        let next = (end < self.rows.len()).then(|| page_url(end));
        let previous = (offset > 0).then(|| page_url(offset.saturating_sub(size)));

        let body = json!({
            "count": self.rows.len(),
            "next": next,
            "previous": previous,
            "results": results,
        });
        RawResponse::new(200, body.to_string().into_bytes())
            .with_header("Content-Type", "application/json")
    }
}

#[async_trait]
impl PageTransport for ScriptedTransport {
    async fn send(&self, request: &PageRequest) -> Result<RawResponse> {
        if self.yielding {
            tokio::task::yield_now().await;
        }
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        match self.take_fault(request.offset()) {
            Some(Fault::Respond(response)) => Ok(response),
            Some(Fault::Network(message)) => Err(Error::Network(message)),
            Some(Fault::Timeout) => Err(Error::Timeout(std::time::Duration::from_secs(10))),
            None => Ok(self.serve_page(request)),
        }
    }
}
