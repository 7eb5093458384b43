//! Message types for the queue task

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::item::InspectItem;
use crate::job::{Job, JobError};
use crate::link::{InspectLink, LinkError};
use crate::store::StoreError;
use crate::worker::{Worker, WorkerError};

/// Errors surfaced to queue callers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    /// Rejected before a job was created
    #[error(transparent)]
    InvalidLink(#[from] LinkError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Queue channel closed")]
    Closed,
}

/// Response from queue operations
pub type QueueResponse<T> = Result<T, QueueError>;

/// Requests to the queue task
pub enum QueueRequest {
    /// Add a worker, waiting for its first Ready if needed
    RegisterWorker { worker: Arc<dyn Worker> },

    /// A worker registered while offline reported Ready (internal)
    WorkerReady { worker: Arc<dyn Worker> },

    /// Append one job to the backlog
    Submit { job: Job },

    /// Append several jobs to the backlog, keeping their order
    SubmitBatch { jobs: Vec<Job> },

    /// A dispatched worker operation resolved (internal)
    Finished {
        job_id: String,
        result: Result<InspectItem, WorkerError>,
    },

    /// Run a scheduling pass (internal)
    Schedule,

    /// Get current metrics
    GetMetrics { reply_tx: oneshot::Sender<QueueMetrics> },

    /// Fail everything outstanding and stop
    Shutdown,
}

impl fmt::Debug for QueueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegisterWorker { worker } => f.debug_struct("RegisterWorker").field("worker", &worker.name()).finish(),
            Self::WorkerReady { worker } => f.debug_struct("WorkerReady").field("worker", &worker.name()).finish(),
            Self::Submit { job } => f.debug_struct("Submit").field("job", job).finish(),
            Self::SubmitBatch { jobs } => f.debug_struct("SubmitBatch").field("jobs", &jobs.len()).finish(),
            Self::Finished { job_id, result } => f
                .debug_struct("Finished")
                .field("job_id", job_id)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Schedule => write!(f, "Schedule"),
            Self::GetMetrics { .. } => write!(f, "GetMetrics"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Per-job notification broadcast on every terminal transition
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Completed { job_id: String, link: InspectLink },
    Failed { job_id: String, link: InspectLink, error: JobError },
}

impl QueueEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job_id, .. } | Self::Failed { job_id, .. } => job_id,
        }
    }
}

/// Queue metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub registered_workers: usize,
    pub ready_workers: usize,
    pub backlog: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    /// Every Failed transition, expiries included
    pub failed: u64,
    pub expired: u64,
    /// Dispatches the worker refused as not ready
    pub requeued: u64,
    pub passes: u64,
}
