//! Worker readiness and worker-level errors

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Externally observable worker readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// No usable session; not selectable
    #[default]
    Offline,
    /// Session up and idle; selectable
    Ready,
    /// Processing a request or cooling down; not selectable
    Busy,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// Errors raised by a worker's inspect operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// Rejected before any work started; the job can be retried elsewhere
    #[error("Worker {worker} is not ready ({state})")]
    NotReady { worker: String, state: WorkerState },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker {worker} went offline")]
    Offline { worker: String },

    #[error("Worker operation failed: {0}")]
    Failed(String),
}

impl WorkerError {
    /// True when the request never reached the backend
    pub fn is_not_ready(&self) -> bool {
        matches!(self, WorkerError::NotReady { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerError::Timeout(_))
    }
}
