//! QueueHandle - Client interface to the queue task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::messages::{QueueError, QueueEvent, QueueMetrics, QueueRequest, QueueResponse};
use crate::batch::{Batch, BatchCallback};
use crate::item::InspectItem;
use crate::job::{Job, JobCallback, JobError, JobOutcome};
use crate::link::InspectLink;
use crate::worker::Worker;

/// Handle for submitting work to the queue
///
/// Cloneable; every clone talks to the same queue task.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueRequest>,
    events: broadcast::Sender<QueueEvent>,
    expiry: Duration,
}

impl QueueHandle {
    pub(crate) fn new(tx: mpsc::Sender<QueueRequest>, events: broadcast::Sender<QueueEvent>, expiry: Duration) -> Self {
        debug!(?expiry, "QueueHandle::new: called");
        Self { tx, events, expiry }
    }

    /// Subscribe to per-job completion and failure events
    ///
    /// Only events sent after subscribing are seen. A slow subscriber that
    /// falls behind the channel capacity gets `RecvError::Lagged`.
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Expiry given to every job created through this handle
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    async fn send(&self, req: QueueRequest) -> QueueResponse<()> {
        self.tx.send(req).await.map_err(|_| QueueError::Closed)
    }

    /// Add a worker to the pool. Offline workers are told to connect and join
    /// once they first report Ready.
    pub async fn register_worker(&self, worker: Arc<dyn Worker>) -> QueueResponse<()> {
        debug!(worker = %worker.name(), "QueueHandle::register_worker: called");
        self.send(QueueRequest::RegisterWorker { worker }).await
    }

    /// Validate and enqueue one link. Returns the job id; the outcome arrives
    /// through the callback.
    pub async fn submit(&self, link: &str, callback: Option<JobCallback>) -> QueueResponse<String> {
        debug!(%link, "QueueHandle::submit: called");
        let link = InspectLink::parse(link)?;
        self.submit_link(link, callback).await
    }

    /// Enqueue an already validated link
    pub async fn submit_link(&self, link: InspectLink, callback: Option<JobCallback>) -> QueueResponse<String> {
        let job = Job::new(link, self.expiry, callback);
        let job_id = job.id().to_string();
        self.send(QueueRequest::Submit { job }).await?;
        debug!(%job_id, "QueueHandle::submit_link: sent");
        Ok(job_id)
    }

    /// Enqueue several links as one batch
    ///
    /// Every link is validated first; one malformed link rejects the whole
    /// batch and nothing is queued. `on_done` fires once, after the last job
    /// finishes, with outcomes in submission order.
    pub async fn submit_batch<S: AsRef<str>>(
        &self,
        links: &[S],
        on_done: Option<BatchCallback>,
    ) -> QueueResponse<Vec<String>> {
        debug!(count = links.len(), "QueueHandle::submit_batch: called");
        let links = links
            .iter()
            .map(|link| InspectLink::parse(link.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.submit_batch_links(links, on_done).await
    }

    /// Enqueue already validated links as one batch
    pub async fn submit_batch_links(
        &self,
        links: Vec<InspectLink>,
        on_done: Option<BatchCallback>,
    ) -> QueueResponse<Vec<String>> {
        let batch = Batch::new(links.len(), on_done);
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let jobs: Vec<Job> = links
            .into_iter()
            .enumerate()
            .map(|(slot, link)| Job::new(link, self.expiry, Some(batch.callback(slot))))
            .collect();
        let ids = jobs.iter().map(|job| job.id().to_string()).collect();

        self.send(QueueRequest::SubmitBatch { jobs }).await?;
        debug!(remaining = batch.remaining(), "QueueHandle::submit_batch_links: sent");
        Ok(ids)
    }

    /// Submit one link and wait for its item
    pub async fn inspect(&self, link: &str) -> QueueResponse<InspectItem> {
        debug!(%link, "QueueHandle::inspect: called");
        let link = InspectLink::parse(link)?;
        self.inspect_link(link).await
    }

    /// Submit one validated link and wait for its item
    pub async fn inspect_link(&self, link: InspectLink) -> QueueResponse<InspectItem> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let callback: JobCallback = Box::new(move |err: Option<&JobError>, job: &Job| {
            let result = match (err, job.item()) {
                (Some(err), _) => Err(err.clone()),
                (None, Some(item)) => Ok(item.clone()),
                (None, None) => Err(JobError::Shutdown),
            };
            let _ = reply_tx.send(result);
        });

        self.submit_link(link, Some(callback)).await?;
        // A dropped job drops the sender with it
        let result = reply_rx.await.map_err(|_| QueueError::Closed)?;
        Ok(result?)
    }

    /// Submit links as one batch and wait for every outcome
    pub async fn inspect_batch<S: AsRef<str>>(&self, links: &[S]) -> QueueResponse<Vec<JobOutcome>> {
        debug!(count = links.len(), "QueueHandle::inspect_batch: called");
        let links = links
            .iter()
            .map(|link| InspectLink::parse(link.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.inspect_batch_links(links).await
    }

    /// Submit validated links as one batch and wait for every outcome
    pub async fn inspect_batch_links(&self, links: Vec<InspectLink>) -> QueueResponse<Vec<JobOutcome>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let on_done: BatchCallback = Box::new(move |outcomes: Vec<JobOutcome>| {
            let _ = reply_tx.send(outcomes);
        });

        self.submit_batch_links(links, Some(on_done)).await?;
        reply_rx.await.map_err(|_| QueueError::Closed)
    }

    /// Get a metrics snapshot
    pub async fn metrics(&self) -> QueueResponse<QueueMetrics> {
        debug!("QueueHandle::metrics: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(QueueRequest::GetMetrics { reply_tx }).await?;
        reply_rx.await.map_err(|_| QueueError::Closed)
    }

    /// Stop the queue, failing whatever is still outstanding
    pub async fn shutdown(&self) -> QueueResponse<()> {
        debug!("QueueHandle::shutdown: called");
        self.send(QueueRequest::Shutdown).await
    }
}
