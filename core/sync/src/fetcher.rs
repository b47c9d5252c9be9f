//! Full traversal of a cursor-paginated collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use stationsync_client::{
    error_message, PageCursor, PagePayload, PageRequest, PageTransport, RawResponse,
    RequestTemplate, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use stationsync_common::{duration_ms, Clock, Error, Result, Row};

use crate::backoff::BackoffPolicy;
use crate::rate_limit::{RateLimitSignal, TOO_MANY_REQUESTS};
use crate::retry::RetryState;
use crate::state::{JobPhase, SyncJob};

/// Per-traversal knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Rows requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Retries allowed per page on top of the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries_per_page: u32,
    /// Pause between consecutive page requests.
    #[serde(with = "duration_ms", default = "default_inter_page_delay")]
    pub inter_page_delay: Duration,
    /// Time budget for a single page request.
    #[serde(with = "duration_ms", default = "default_page_timeout")]
    pub page_timeout: Duration,
    /// Row count below which a completed traversal is reported as suspicious.
    #[serde(default)]
    pub expected_min_rows: Option<usize>,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_inter_page_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_page_timeout() -> Duration {
    Duration::from_secs(10)
}

impl FetchOptions {
    /// Set page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set per-page retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries_per_page = max_retries;
        self
    }

    /// Set inter-page delay.
    pub fn with_inter_page_delay(mut self, delay: Duration) -> Self {
        self.inter_page_delay = delay;
        self
    }

    /// Set per-page timeout.
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Set the expected row floor.
    pub fn with_expected_min_rows(mut self, rows: Option<usize>) -> Self {
        self.expected_min_rows = rows;
        self
    }

    /// Check the options are usable.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidInput(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.page_timeout.is_zero() {
            return Err(Error::InvalidInput("Page timeout must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_retries_per_page: default_max_retries(),
            inter_page_delay: default_inter_page_delay(),
            page_timeout: default_page_timeout(),
            expected_min_rows: None,
        }
    }
}

/// Outcome of one page fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub rows: Vec<Row>,
    /// Cursor for the following page; at its end when this was the last.
    pub cursor: PageCursor,
    /// Collection size reported by the upstream, if any.
    pub total_count: Option<u64>,
}

/// Every row of a collection, gathered by one complete traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub rows: Vec<Row>,
    pub page_count: u32,
    pub fetched_at: DateTime<Utc>,
}

/// Drives sequential page fetches with per-page retry.
///
/// Pages are requested strictly one after another: the request for page
/// N+1 is built from page N's `next` reference. Any page that cannot be
/// fetched aborts the traversal and the rows gathered so far are dropped.
pub struct PaginatedFetcher<T: PageTransport + ?Sized> {
    transport: Arc<T>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl<T: PageTransport + ?Sized> PaginatedFetcher<T> {
    /// Create a fetcher over `transport`.
    pub fn new(transport: Arc<T>, backoff: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            backoff,
            clock,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Backoff policy applied between retries.
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Fetch every page of `template`'s collection.
    ///
    /// # Errors
    /// - `Sync` when a page exhausts its retries, is rejected by the upstream
    ///   or comes back malformed
    /// - `InvalidInput` when `page_size` is out of range
    pub async fn fetch_all(
        &self,
        template: &RequestTemplate,
        page_size: u32,
        max_retries_per_page: u32,
    ) -> Result<SyncResult> {
        let options = FetchOptions::default()
            .with_page_size(page_size)
            .with_max_retries(max_retries_per_page);
        self.fetch_all_with(template, &options).await
    }

    /// [`Self::fetch_all`] with full options.
    pub async fn fetch_all_with(
        &self,
        template: &RequestTemplate,
        options: &FetchOptions,
    ) -> Result<SyncResult> {
        let mut job = SyncJob::new(template.collection_path.clone());
        self.run(&mut job, template, options).await
    }

    /// Traverse the collection, recording progress on `job`.
    ///
    /// `job` must be idle; a finished job cannot be resumed.
    pub async fn run(
        &self,
        job: &mut SyncJob,
        template: &RequestTemplate,
        options: &FetchOptions,
    ) -> Result<SyncResult> {
        if job.phase != JobPhase::Idle {
            return Err(Error::InvalidState(format!(
                "job {} has already run; start a new job",
                job.id
            )));
        }
        options.validate()?;

        let span = info_span!("sync", job_id = %job.id, collection = %job.collection);
        self.traverse(job, template, options).instrument(span).await
    }

    /// Fetch a single page at `cursor`, with the same retry discipline as a
    /// full traversal.
    pub async fn fetch_page(
        &self,
        template: &RequestTemplate,
        cursor: &PageCursor,
        options: &FetchOptions,
    ) -> Result<PageResult> {
        options.validate()?;
        let mut job = SyncJob::new(template.collection_path.clone());
        let span = info_span!("page", job_id = %job.id, offset = ?cursor.token());

        async {
            let page = match self.fetch_with_retry(&mut job, template, cursor, 1, options).await {
                Ok(page) => page,
                Err(err) => return Err(self.abort(&mut job, err)),
            };
            job.record_page(page.rows.len())?;
            job.complete(self.clock.now())?;
            Ok(page)
        }
        .instrument(span)
        .await
    }

    async fn traverse(
        &self,
        job: &mut SyncJob,
        template: &RequestTemplate,
        options: &FetchOptions,
    ) -> Result<SyncResult> {
        info!("Starting traversal (page size {})", options.page_size);

        let mut rows: Vec<Row> = Vec::new();
        let mut cursor = PageCursor::initial();
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut reported_count = None;
        let mut page: u32 = 0;

        loop {
            page += 1;
            if page > 1 && !options.inter_page_delay.is_zero() {
                self.clock.sleep(options.inter_page_delay).await;
            }

            let result = match self.fetch_with_retry(job, template, &cursor, page, options).await {
                Ok(result) => result,
                Err(err) => return Err(self.abort(job, err)),
            };

            job.record_page(result.rows.len())?;
            debug!(page, rows = result.rows.len(), "Page fetched");
            rows.extend(result.rows);
            reported_count = result.total_count.or(reported_count);
            cursor = result.cursor;

            match cursor.token() {
                None => break,
                Some(token) if !seen_tokens.insert(token.to_string()) => {
                    let err = Error::MalformedResponse(format!(
                        "next reference repeats offset '{}'",
                        token
                    ));
                    return Err(self.abort(job, err));
                }
                Some(_) => {}
            }
        }

        let fetched_at = self.clock.now();
        job.complete(fetched_at)?;
        self.check_row_count(rows.len(), reported_count, options.expected_min_rows);
        info!("Traversal complete: {} rows in {} pages", rows.len(), job.pages_completed);

        Ok(SyncResult {
            rows,
            page_count: job.pages_completed,
            fetched_at,
        })
    }

    async fn fetch_with_retry(
        &self,
        job: &mut SyncJob,
        template: &RequestTemplate,
        cursor: &PageCursor,
        page: u32,
        options: &FetchOptions,
    ) -> Result<PageResult> {
        let request = template.page(options.page_size, cursor);
        let mut retry = RetryState::new(options.max_retries_per_page);

        loop {
            job.begin_page(page, self.clock.now())?;

            let err = match self.attempt(&request, options.page_timeout).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(page, error = %err, "Page fetch failed with a terminal error");
                return Err(err);
            }
            if !retry.record_failure() {
                warn!(
                    page,
                    attempts = retry.attempt(),
                    error = %err,
                    "Page retry budget exhausted"
                );
                return Err(err);
            }

            let delay = RateLimitSignal::for_error(&err)
                .wait(&self.backoff, retry.backoff_index())
                .unwrap_or_default();
            warn!(
                page,
                attempt = retry.attempt(),
                max_attempts = retry.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Page fetch failed; retrying"
            );
            job.wait_backoff(retry.attempt(), delay)?;
            self.clock.sleep(delay).await;
        }
    }

    async fn attempt(&self, request: &PageRequest, timeout: Duration) -> Result<PageResult> {
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(response) => response?,
            Err(_) => return Err(Error::Timeout(timeout)),
        };

        let payload = classify(&response)?;
        let (cursor, warning) = PageCursor::from_next_reference(payload.next.as_deref());
        if let Some(warning) = warning {
            warn!("{}; treating as the last page", warning);
        }

        Ok(PageResult {
            rows: payload.results,
            cursor,
            total_count: payload.count,
        })
    }

    fn abort(&self, job: &mut SyncJob, cause: Error) -> Error {
        let failure = Error::sync_failure(job.pages_completed, cause);
        if let Err(state_err) = job.fail(failure.to_string(), self.clock.now()) {
            debug!("Could not mark job failed: {}", state_err);
        }
        warn!("{}", failure);
        failure
    }

    fn check_row_count(&self, fetched: usize, reported: Option<u64>, floor: Option<usize>) {
        if let Some(floor) = floor {
            if fetched < floor {
                warn!(
                    fetched,
                    expected_min = floor,
                    "Fetched far fewer rows than expected; upstream pagination may be broken"
                );
            }
        }
        if let Some(reported) = reported {
            if reported != fetched as u64 {
                debug!(
                    fetched,
                    reported, "Row count differs from upstream count; collection changed mid-sync?"
                );
            }
        }
    }
}

/// Turn a raw response into a page payload or a classified failure.
fn classify(response: &RawResponse) -> Result<PagePayload> {
    match response.status {
        status if (200..300).contains(&status) => {
            PagePayload::from_slice(&response.body).map_err(|err| {
                warn!(status, "Rejecting page body: {}", err);
                err
            })
        }
        TOO_MANY_REQUESTS => {
            let signal = RateLimitSignal::interpret(response.status, &response.headers);
            Err(Error::RateLimited {
                retry_after: signal.wait_duration,
            })
        }
        status if status >= 500 => Err(Error::Server {
            status,
            message: error_message(&response.body),
        }),
        status => Err(Error::Client {
            status,
            message: error_message(&response.body),
        }),
    }
}
