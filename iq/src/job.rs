//! Job lifecycle
//!
//! ```text
//! Created --dispatch--> Pending --complete--> Completed
//!    |  ^                  |
//!    |  +----requeue-------+
//!    +--------fail---------+-----fail-----> Failed
//! ```
//!
//! A job leaves Created only through a worker dispatch or its own expiry.
//! Terminal transitions happen once; later attempts are no-ops.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::item::InspectItem;
use crate::link::InspectLink;
use crate::worker::WorkerError;

/// Reasons a job ends in Failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Never dispatched before its deadline
    #[error("Job timed out after {0:?} without a worker")]
    Expired(Duration),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Queue shut down before the job finished")]
    Shutdown,
}

impl JobError {
    pub fn is_expired(&self) -> bool {
        matches!(self, JobError::Expired(_))
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in the backlog
    Created,
    /// Handed to a worker
    Pending,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Invoked exactly once, on the terminal transition, with `(error, job)`
pub type JobCallback = Box<dyn FnOnce(Option<&JobError>, &Job) + Send + 'static>;

/// Snapshot of a finished job: either an item or an error, never both
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub id: String,
    pub link: InspectLink,
    pub created_at: DateTime<Utc>,
    pub result: Result<InspectItem, JobError>,
}

impl JobOutcome {
    pub fn item(&self) -> Option<&InspectItem> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.result.as_ref().err()
    }
}

/// One queued inspect request
pub struct Job {
    id: String,
    link: InspectLink,
    created_at: DateTime<Utc>,
    expiry: Duration,
    deadline: Instant,
    state: JobState,
    item: Option<InspectItem>,
    error: Option<JobError>,
    callback: Option<JobCallback>,
}

impl Job {
    /// Create a job in Created whose deadline is `expiry` from now
    pub fn new(link: InspectLink, expiry: Duration, callback: Option<JobCallback>) -> Self {
        let id = Uuid::now_v7().to_string();
        debug!(%id, %link, ?expiry, "Job::new: called");
        Self {
            id,
            link,
            created_at: Utc::now(),
            expiry,
            deadline: Instant::now() + expiry,
            state: JobState::Created,
            item: None,
            error: None,
            callback,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn link(&self) -> &InspectLink {
        &self.link
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Set only when Completed
    pub fn item(&self) -> Option<&InspectItem> {
        self.item.as_ref()
    }

    /// Set only when Failed
    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    /// True when still undispatched at or past the deadline
    pub fn is_expired(&self, now: Instant) -> bool {
        self.state == JobState::Created && now >= self.deadline
    }

    /// Terminal snapshot, None while the job is still live
    pub fn outcome(&self) -> Option<JobOutcome> {
        let result = match self.state {
            JobState::Completed => Ok(self.item.clone()?),
            JobState::Failed => Err(self.error.clone()?),
            JobState::Created | JobState::Pending => return None,
        };
        Some(JobOutcome {
            id: self.id.clone(),
            link: self.link.clone(),
            created_at: self.created_at,
            result,
        })
    }

    /// Created -> Pending. Returns false if the job was already claimed or finished.
    pub(crate) fn begin(&mut self) -> bool {
        if self.state != JobState::Created {
            debug!(id = %self.id, state = %self.state, "Job::begin: not created, skipping");
            return false;
        }
        self.state = JobState::Pending;
        true
    }

    /// Pending -> Created, for a dispatch the worker refused before starting
    pub(crate) fn requeue(&mut self) -> bool {
        if self.state != JobState::Pending {
            return false;
        }
        debug!(id = %self.id, "Job::requeue: back to created");
        self.state = JobState::Created;
        true
    }

    /// Pending -> Completed, firing the callback. No-op from any other state.
    pub fn complete(&mut self, item: InspectItem) -> bool {
        if self.state != JobState::Pending {
            warn!(id = %self.id, state = %self.state, "Job::complete: ignored, job not pending");
            return false;
        }
        self.item = Some(item);
        self.state = JobState::Completed;
        self.finish();
        true
    }

    /// Created or Pending -> Failed, firing the callback. Returns true only on
    /// the transition itself, so callers can react once per job.
    pub fn fail(&mut self, error: JobError) -> bool {
        if self.state.is_terminal() {
            debug!(id = %self.id, state = %self.state, "Job::fail: already terminal");
            return false;
        }
        debug!(id = %self.id, %error, "Job::fail: failing job");
        self.error = Some(error);
        self.state = JobState::Failed;
        self.finish();
        true
    }

    /// Fail with `JobError::Expired` if the deadline has passed
    pub fn expire(&mut self, now: Instant) -> bool {
        if !self.is_expired(now) {
            return false;
        }
        self.fail(JobError::Expired(self.expiry))
    }

    fn finish(&mut self) {
        if let Some(callback) = self.callback.take() {
            let job: &Job = self;
            let fired = std::panic::catch_unwind(AssertUnwindSafe(|| callback(job.error.as_ref(), job)));
            if fired.is_err() {
                warn!(id = %job.id, state = %job.state, "Job::finish: callback panicked");
            }
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("link", &self.link.as_str())
            .field("state", &self.state)
            .field("deadline", &self.deadline)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}
