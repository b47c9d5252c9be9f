//! Traversal progress tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use stationsync_common::{duration_ms, Error, Result};

/// Where a traversal currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum JobPhase {
    /// Not started.
    Idle,
    /// A request for `page` (1-based) is in flight.
    Fetching { page: u32 },
    /// Sleeping before retrying `page`.
    WaitingBackoff {
        page: u32,
        attempt: u32,
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Every page was fetched.
    Completed { pages: u32, rows: usize },
    /// Traversal aborted.
    Failed { pages_completed: u32, reason: String },
}

impl JobPhase {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed { .. } | JobPhase::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Fetching { .. } => "fetching",
            JobPhase::WaitingBackoff { .. } => "waiting_backoff",
            JobPhase::Completed { .. } => "completed",
            JobPhase::Failed { .. } => "failed",
        }
    }
}

/// One full traversal of a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique job identifier, used to correlate log lines.
    pub id: Uuid,
    /// Collection path being traversed.
    pub collection: String,
    /// Current phase.
    pub phase: JobPhase,
    /// When the first page was requested.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal phase.
    pub finished_at: Option<DateTime<Utc>>,
    /// Pages fetched successfully.
    pub pages_completed: u32,
    /// Rows accumulated so far.
    pub rows_collected: usize,
}

impl SyncJob {
    /// Create an idle job.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection: collection.into(),
            phase: JobPhase::Idle,
            started_at: None,
            finished_at: None,
            pages_completed: 0,
            rows_collected: 0,
        }
    }

    /// Start (or retry) the request for `page`.
    pub fn begin_page(&mut self, page: u32, now: DateTime<Utc>) -> Result<()> {
        let expected = self.pages_completed + 1;
        let allowed = match &self.phase {
            JobPhase::Idle => page == 1,
            JobPhase::Fetching { page: current } => page == expected && *current < page,
            JobPhase::WaitingBackoff { page: waiting, .. } => *waiting == page,
            _ => false,
        };
        if !allowed || page != expected {
            return Err(self.illegal(&format!("begin page {}", page)));
        }

        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.phase = JobPhase::Fetching { page };
        Ok(())
    }

    /// Record the page in flight as fetched.
    pub fn record_page(&mut self, rows: usize) -> Result<()> {
        match self.phase {
            JobPhase::Fetching { page } if page == self.pages_completed + 1 => {
                self.pages_completed = page;
                self.rows_collected += rows;
                Ok(())
            }
            _ => Err(self.illegal("record page")),
        }
    }

    /// Enter backoff before retrying the page in flight.
    pub fn wait_backoff(&mut self, attempt: u32, delay: Duration) -> Result<()> {
        match self.phase {
            JobPhase::Fetching { page } if page > self.pages_completed => {
                self.phase = JobPhase::WaitingBackoff {
                    page,
                    attempt,
                    delay,
                };
                Ok(())
            }
            _ => Err(self.illegal("wait for backoff")),
        }
    }

    /// Mark the traversal complete.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.phase {
            JobPhase::Fetching { page } if page == self.pages_completed => {
                self.phase = JobPhase::Completed {
                    pages: self.pages_completed,
                    rows: self.rows_collected,
                };
                self.finished_at = Some(now);
                Ok(())
            }
            _ => Err(self.illegal("complete")),
        }
    }

    /// Abort the traversal.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(self.illegal("fail"));
        }
        self.phase = JobPhase::Failed {
            pages_completed: self.pages_completed,
            reason: reason.into(),
        };
        self.finished_at = Some(now);
        Ok(())
    }

    /// Whether the job has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Wall time between start and finish, if both are known.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }

    fn illegal(&self, action: &str) -> Error {
        Error::InvalidState(format!(
            "job {} cannot {} while {}",
            self.id,
            action,
            self.phase.label()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_happy_path() {
        let mut job = SyncJob::new("/api/database/rows/table/1/");
        assert_eq!(job.phase, JobPhase::Idle);

        job.begin_page(1, now()).unwrap();
        job.record_page(100).unwrap();
        job.begin_page(2, now()).unwrap();
        job.record_page(40).unwrap();
        job.complete(now()).unwrap();

        assert_eq!(job.phase, JobPhase::Completed { pages: 2, rows: 140 });
        assert!(job.is_finished());
        assert!(job.elapsed().is_some());
    }

    #[test]
    fn test_backoff_and_retry_same_page() {
        let mut job = SyncJob::new("stations");
        job.begin_page(1, now()).unwrap();
        job.wait_backoff(1, Duration::from_millis(500)).unwrap();
        assert!(matches!(
            job.phase,
            JobPhase::WaitingBackoff { page: 1, attempt: 1, .. }
        ));

        // Cannot skip ahead while waiting
        assert!(job.begin_page(2, now()).is_err());

        job.begin_page(1, now()).unwrap();
        job.record_page(10).unwrap();
        assert_eq!(job.pages_completed, 1);
    }

    #[test]
    fn test_fail_keeps_progress() {
        let mut job = SyncJob::new("stations");
        job.begin_page(1, now()).unwrap();
        job.record_page(100).unwrap();
        job.begin_page(2, now()).unwrap();
        job.fail("upstream rejected page request (404)", now()).unwrap();

        match &job.phase {
            JobPhase::Failed { pages_completed, .. } => assert_eq!(*pages_completed, 1),
            other => panic!("unexpected phase {:?}", other),
        }
        assert!(job.fail("again", now()).is_err());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut job = SyncJob::new("stations");
        assert!(job.record_page(1).is_err());
        assert!(job.complete(now()).is_err());
        assert!(job.begin_page(2, now()).is_err());
        assert!(job.wait_backoff(1, Duration::ZERO).is_err());

        job.begin_page(1, now()).unwrap();
        // Page in flight has not been recorded yet
        assert!(job.complete(now()).is_err());
        assert!(matches!(
            job.begin_page(1, now()),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_phase_serializes_with_tag() {
        let phase = JobPhase::Completed { pages: 7, rows: 650 };
        let json = serde_json::to_value(&phase).unwrap();
        assert_eq!(json["phase"], "completed");
        assert_eq!(json["rows"], 650);
    }
}
