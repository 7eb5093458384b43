//! Worker trait consumed by the queue

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::state::{WorkerError, WorkerState};
use crate::item::InspectItem;
use crate::link::InspectLink;

/// A pooled session capable of one inspect request at a time
///
/// The queue only reads readiness and invokes `process_request`. Everything
/// that moves a worker between states (login, reconnect, cooldown) lives
/// behind this trait.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable name used in logs and errors
    fn name(&self) -> &str;

    /// Live readiness feed
    fn subscribe(&self) -> watch::Receiver<WorkerState>;

    /// Current readiness
    fn state(&self) -> WorkerState {
        *self.subscribe().borrow()
    }

    /// Begin connecting if offline. Returns immediately.
    fn connect(&self) {}

    /// Resolve once the worker first reports Ready
    async fn ready(&self) -> Result<(), WorkerError> {
        debug!(worker = %self.name(), "Worker::ready: called");
        let mut rx = self.subscribe();
        let outcome = rx.wait_for(|state| *state == WorkerState::Ready).await.map(|_| ());
        outcome.map_err(|_| WorkerError::Offline {
            worker: self.name().to_string(),
        })
    }

    /// Inspect one link. Must fail with `WorkerError::NotReady` without side
    /// effects when the worker is not Ready.
    async fn process_request(&self, link: &InspectLink) -> Result<InspectItem, WorkerError>;
}

/// The remote side of a session worker
#[async_trait]
pub trait InspectBackend: Send + Sync + 'static {
    /// Establish the session
    async fn connect(&self) -> Result<(), WorkerError>;

    /// Ask the remote service about one link and wait for its answer
    async fn inspect(&self, link: &InspectLink) -> Result<InspectItem, WorkerError>;
}
