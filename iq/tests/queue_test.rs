//! Scheduling scenarios for the queue
//!
//! Workers are real `SessionWorker`s over a scripted backend that records
//! when each request starts and ends, so the tests can check dispatch order
//! and single-flight use from the outside.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use inspectq::item::InspectItem;
use inspectq::job::{Job, JobCallback, JobError, JobOutcome};
use inspectq::link::InspectLink;
use inspectq::queue::{Queue, QueueConfig, QueueError, QueueEvent, QueueHandle};
use inspectq::worker::{InspectBackend, SessionWorker, Worker, WorkerConfig, WorkerError, WorkerState, simulated_item};

// =============================================================================
// Harness
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start { worker: String, asset: String, at: Instant },
    End { worker: String, asset: String },
    Callback { asset: String },
}

type Events = Arc<Mutex<Vec<Event>>>;

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedBackend {
    name: String,
    latency: Duration,
    events: Events,
    hang: HashSet<String>,
    fail: HashSet<String>,
    active: AtomicUsize,
    overlapped: Arc<AtomicBool>,
}

#[async_trait]
impl InspectBackend for ScriptedBackend {
    async fn connect(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn inspect(&self, link: &InspectLink) -> Result<InspectItem, WorkerError> {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let _guard = InFlightGuard(&self.active);

        let asset = link.asset_id().to_string();
        self.events.lock().unwrap().push(Event::Start {
            worker: self.name.clone(),
            asset: asset.clone(),
            at: Instant::now(),
        });

        if self.hang.contains(&asset) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.latency).await;

        self.events.lock().unwrap().push(Event::End {
            worker: self.name.clone(),
            asset: asset.clone(),
        });
        if self.fail.contains(&asset) {
            return Err(WorkerError::Failed(format!("scripted failure for {}", asset)));
        }
        Ok(simulated_item(link))
    }
}

struct Harness {
    handle: QueueHandle,
    task: tokio::task::JoinHandle<()>,
    events: Events,
    overlapped: Arc<AtomicBool>,
}

impl Harness {
    fn new(queue: QueueConfig) -> Self {
        let (handle, task) = Queue::spawn(queue);
        Self {
            handle,
            task,
            events: Arc::new(Mutex::new(Vec::new())),
            overlapped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn worker(
        &self,
        name: &str,
        config: WorkerConfig,
        latency: Duration,
        hang: &[&str],
        fail: &[&str],
    ) -> Arc<SessionWorker<ScriptedBackend>> {
        let backend = ScriptedBackend {
            name: name.to_string(),
            latency,
            events: self.events.clone(),
            hang: hang.iter().map(|s| s.to_string()).collect(),
            fail: fail.iter().map(|s| s.to_string()).collect(),
            active: AtomicUsize::new(0),
            overlapped: self.overlapped.clone(),
        };
        Arc::new(SessionWorker::new(name, backend, config))
    }

    fn starts(&self) -> Vec<(String, String, Instant)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Start { worker, asset, at } => Some((worker.clone(), asset.clone(), *at)),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_workers(&self, count: usize) {
        for _ in 0..100 {
            if self.handle.metrics().await.unwrap().registered_workers >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workers never registered");
    }

    async fn stop(self) {
        self.handle.shutdown().await.expect("Failed to send shutdown");
        let result = tokio::time::timeout(Duration::from_secs(5), self.task).await;
        assert!(result.is_ok(), "Queue should shut down gracefully");
    }
}

fn fast_queue() -> QueueConfig {
    QueueConfig {
        expiry_ms: 5_000,
        tick_interval_ms: 20,
        channel_buffer: 64,
    }
}

fn worker_config(ttl_ms: u64, delay_ms: u64) -> WorkerConfig {
    WorkerConfig {
        request_ttl_ms: ttl_ms,
        request_delay_ms: delay_ms,
        ready_delay_ms: 0,
    }
}

fn link(asset: u32) -> String {
    format!("S76561198000000000A{}D1", asset)
}

/// Callback that forwards `(asset, error)` to a channel and logs the call
fn reporting_callback(events: &Events, tx: &mpsc::UnboundedSender<(String, Option<JobError>)>) -> JobCallback {
    let events = events.clone();
    let tx = tx.clone();
    Box::new(move |err: Option<&JobError>, job: &Job| {
        let asset = job.link().asset_id().to_string();
        events.lock().unwrap().push(Event::Callback { asset: asset.clone() });
        let _ = tx.send((asset, err.cloned()));
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_two_workers_five_jobs_dispatch_in_fifo_order() {
    let harness = Harness::new(fast_queue());
    let latency = Duration::from_millis(40);
    for name in ["a", "b"] {
        let worker = harness.worker(name, worker_config(1_000, 0), latency, &[], &[]);
        worker.mark_ready();
        harness.handle.register_worker(worker).await.unwrap();
    }

    let links: Vec<String> = (1..=5).map(link).collect();
    let outcomes = tokio::time::timeout(Duration::from_secs(5), harness.handle.inspect_batch(&links))
        .await
        .expect("batch should finish")
        .unwrap();

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.item().is_some()));

    let starts = harness.starts();
    assert_eq!(starts.len(), 5);
    let first: HashSet<&str> = starts[..2].iter().map(|(_, asset, _)| asset.as_str()).collect();
    assert_eq!(first, HashSet::from(["1", "2"]));
    let first_workers: HashSet<&str> = starts[..2].iter().map(|(worker, _, _)| worker.as_str()).collect();
    assert_eq!(first_workers, HashSet::from(["a", "b"]));

    // #3 only goes out once a worker has finished #1 or #2
    let third = starts.iter().position(|(_, asset, _)| asset == "3").unwrap();
    assert_eq!(third, 2);
    let events = harness.events.lock().unwrap().clone();
    let third_at = events
        .iter()
        .position(|e| matches!(e, Event::Start { asset, .. } if asset == "3"))
        .unwrap();
    assert!(events[..third_at].iter().any(|e| matches!(e, Event::End { .. })));

    assert!(!harness.overlapped.load(Ordering::SeqCst), "a worker ran two requests at once");

    let metrics = harness.handle.metrics().await.unwrap();
    assert_eq!(metrics.submitted, 5);
    assert_eq!(metrics.dispatched, 5);
    assert_eq!(metrics.completed, 5);
    assert_eq!(metrics.requeued, 0, "queue offered a job to a worker that was not ready");
    harness.stop().await;
}

#[tokio::test]
async fn test_job_without_workers_expires() {
    let queue = QueueConfig {
        expiry_ms: 200,
        tick_interval_ms: 20,
        channel_buffer: 16,
    };
    let harness = Harness::new(queue);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let submitted = Instant::now();
    harness
        .handle
        .submit(&link(1), Some(reporting_callback(&harness.events, &tx)))
        .await
        .unwrap();

    let (asset, err) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("job should expire")
        .unwrap();
    let elapsed = submitted.elapsed();

    assert_eq!(asset, "1");
    assert_eq!(err, Some(JobError::Expired(Duration::from_millis(200))));
    assert!(elapsed >= Duration::from_millis(200), "expired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "expired late: {:?}", elapsed);

    // Exactly one callback
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    let metrics = harness.handle.metrics().await.unwrap();
    assert_eq!(metrics.expired, 1);
    assert_eq!(metrics.backlog, 0);
    harness.stop().await;
}

#[tokio::test]
async fn test_timeout_fails_job_and_worker_returns_after_cooldown() {
    let harness = Harness::new(fast_queue());
    let worker = harness.worker("a", worker_config(100, 150), Duration::from_millis(10), &["1"], &[]);
    worker.mark_ready();
    harness.handle.register_worker(worker.clone()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for asset in [1, 2] {
        harness
            .handle
            .submit(&link(asset), Some(reporting_callback(&harness.events, &tx)))
            .await
            .unwrap();
    }

    let (first, err) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, "1");
    assert_eq!(err, Some(JobError::Worker(WorkerError::Timeout(Duration::from_millis(100)))));

    let (second, err) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, "2");
    assert!(err.is_none());

    let starts = harness.starts();
    assert_eq!(starts.len(), 2);
    let gap = starts[1].2.duration_since(starts[0].2);
    assert!(gap >= Duration::from_millis(240), "worker reused before cooldown: {:?}", gap);

    let metrics = harness.handle.metrics().await.unwrap();
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.completed, 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_back_to_back_waits_for_previous_callback() {
    let harness = Harness::new(fast_queue());
    let worker = harness.worker("a", worker_config(1_000, 0), Duration::from_millis(10), &[], &[]);
    worker.mark_ready();
    harness.handle.register_worker(worker).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for asset in [1, 2] {
        harness
            .handle
            .submit(&link(asset), Some(reporting_callback(&harness.events, &tx)))
            .await
            .unwrap();
    }
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    }

    let events = harness.events.lock().unwrap().clone();
    let first_callback = events
        .iter()
        .position(|e| matches!(e, Event::Callback { asset } if asset == "1"))
        .unwrap();
    let second_start = events
        .iter()
        .position(|e| matches!(e, Event::Start { asset, .. } if asset == "2"))
        .unwrap();
    assert!(first_callback < second_start, "job #2 dispatched before job #1's callback ran");
    harness.stop().await;
}

#[tokio::test]
async fn test_batch_keeps_every_slot_when_some_fail() {
    let harness = Harness::new(fast_queue());
    for name in ["a", "b", "c"] {
        let worker = harness.worker(name, worker_config(1_000, 5), Duration::from_millis(5), &[], &["2", "5"]);
        worker.mark_ready();
        harness.handle.register_worker(worker).await.unwrap();
    }

    let links: Vec<String> = (1..=8).map(link).collect();
    let outcomes = tokio::time::timeout(Duration::from_secs(5), harness.handle.inspect_batch(&links))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcomes.len(), 8);
    for (i, outcome) in outcomes.iter().enumerate() {
        let asset = (i + 1).to_string();
        assert_eq!(outcome.link.asset_id(), asset);
        let should_fail = asset == "2" || asset == "5";
        assert_eq!(outcome.error().is_some(), should_fail, "slot {}", asset);
        assert_eq!(outcome.item().is_some(), !should_fail, "slot {}", asset);
    }
    assert!(!harness.overlapped.load(Ordering::SeqCst));
    harness.stop().await;
}

#[tokio::test]
async fn test_offline_worker_joins_once_connected() {
    let harness = Harness::new(fast_queue());
    let config = WorkerConfig {
        ready_delay_ms: 50,
        ..worker_config(1_000, 0)
    };
    let worker = harness.worker("late", config, Duration::from_millis(5), &[], &[]);
    assert_eq!(worker.state(), WorkerState::Offline);

    harness.handle.register_worker(worker.clone()).await.unwrap();
    let item = tokio::time::timeout(Duration::from_secs(5), harness.handle.inspect(&link(9)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.itemid, "9");

    let metrics = harness.handle.metrics().await.unwrap();
    assert_eq!(metrics.registered_workers, 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_worker_going_offline_and_back_is_picked_up_again() {
    let harness = Harness::new(fast_queue());
    let worker = harness.worker("flaky", worker_config(1_000, 0), Duration::from_millis(5), &[], &[]);
    worker.mark_ready();
    harness.handle.register_worker(worker.clone()).await.unwrap();
    harness.wait_for_workers(1).await;
    worker.mark_offline();

    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .handle
        .submit(&link(4), Some(reporting_callback(&harness.events, &tx)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    assert!(harness.starts().is_empty(), "offline worker received a job");
    let metrics = harness.handle.metrics().await.unwrap();
    assert_eq!(metrics.backlog, 1);

    worker.mark_ready();
    let (asset, err) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(asset, "4");
    assert!(err.is_none());
    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_jobs_once() {
    let harness = Harness::new(fast_queue());
    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .handle
        .submit(&link(1), Some(reporting_callback(&harness.events, &tx)))
        .await
        .unwrap();

    harness.handle.shutdown().await.unwrap();
    let (asset, err) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(asset, "1");
    assert_eq!(err, Some(JobError::Shutdown));

    tokio::time::timeout(Duration::from_secs(5), harness.task)
        .await
        .expect("queue should stop")
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_submissions_racing_shutdown_still_call_back() {
    let harness = Harness::new(fast_queue());
    let (tx, mut rx) = mpsc::unbounded_channel();

    harness.handle.shutdown().await.unwrap();
    let mut accepted = 0;
    for asset in 1..=5 {
        match harness
            .handle
            .submit(&link(asset), Some(reporting_callback(&harness.events, &tx)))
            .await
        {
            Ok(_) => accepted += 1,
            Err(err) => assert_eq!(err, QueueError::Closed),
        }
    }
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let batch = harness
        .handle
        .submit_batch(
            &[link(6), link(7)],
            Some(Box::new(move |outcomes: Vec<JobOutcome>| {
                let _ = done_tx.send(outcomes);
            })),
        )
        .await;

    tokio::time::timeout(Duration::from_secs(5), harness.task)
        .await
        .expect("queue should stop")
        .unwrap();

    for _ in 0..accepted {
        let (_, err) = rx.try_recv().expect("accepted job should call back");
        assert_eq!(err, Some(JobError::Shutdown));
    }
    assert!(rx.try_recv().is_err());

    if batch.is_ok() {
        let outcomes = done_rx.await.expect("accepted batch should call back");
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result == Err(JobError::Shutdown)));
    }
}

#[tokio::test]
async fn test_events_report_each_terminal_job() {
    let harness = Harness::new(fast_queue());
    let mut events = harness.handle.subscribe_events();
    let worker = harness.worker("a", worker_config(1_000, 0), Duration::from_millis(5), &[], &["2"]);
    worker.mark_ready();
    harness.handle.register_worker(worker).await.unwrap();

    let ids = harness.handle.submit_batch(&[link(1), link(2)], None).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event should arrive")
            .unwrap();
        seen.push(event);
    }

    assert!(matches!(&seen[0], QueueEvent::Completed { link, .. } if link.asset_id() == "1"));
    assert_eq!(seen[0].job_id(), ids[0]);
    assert!(matches!(
        &seen[1],
        QueueEvent::Failed { error: JobError::Worker(WorkerError::Failed(_)), link, .. } if link.asset_id() == "2"
    ));
    assert_eq!(seen[1].job_id(), ids[1]);
    harness.stop().await;
}

// =============================================================================
// Custom workers
// =============================================================================

/// Ready forever and panics on every request
struct PanickingWorker {
    state: watch::Sender<WorkerState>,
}

#[async_trait]
impl Worker for PanickingWorker {
    fn name(&self) -> &str {
        "panicky"
    }

    fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    async fn process_request(&self, _link: &InspectLink) -> Result<InspectItem, WorkerError> {
        panic!("backend exploded");
    }
}

#[tokio::test]
async fn test_panicking_worker_fails_job_and_queue_keeps_running() {
    let harness = Harness::new(fast_queue());
    let worker = Arc::new(PanickingWorker {
        state: watch::channel(WorkerState::Ready).0,
    });
    harness.handle.register_worker(worker).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), harness.handle.inspect(&link(1)))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Job(JobError::Worker(WorkerError::Failed(_)))
    ));

    // Still answering
    let metrics = harness.handle.metrics().await.unwrap();
    assert_eq!(metrics.failed, 1);
    harness.stop().await;
}

/// Reports Ready forever but refuses every request
struct RefusingWorker {
    state: watch::Sender<WorkerState>,
    calls: AtomicUsize,
}

#[async_trait]
impl Worker for RefusingWorker {
    fn name(&self) -> &str {
        "stubborn"
    }

    fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    async fn process_request(&self, _link: &InspectLink) -> Result<InspectItem, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(WorkerError::NotReady {
            worker: "stubborn".to_string(),
            state: WorkerState::Ready,
        })
    }
}

#[tokio::test]
async fn test_refusing_worker_is_backed_off_and_job_expires() {
    let harness = Harness::new(QueueConfig {
        expiry_ms: 200,
        ..fast_queue()
    });
    let worker = Arc::new(RefusingWorker {
        state: watch::channel(WorkerState::Ready).0,
        calls: AtomicUsize::new(0),
    });
    harness.handle.register_worker(worker.clone()).await.unwrap();

    let started = Instant::now();
    let err = tokio::time::timeout(Duration::from_secs(2), harness.handle.inspect(&link(1)))
        .await
        .expect("job should expire instead of spinning")
        .unwrap_err();
    assert_eq!(err, QueueError::Job(JobError::Expired(Duration::from_millis(200))));
    assert!(started.elapsed() >= Duration::from_millis(190));

    // Roughly one offer per tick, not one per loop iteration
    let calls = worker.calls.load(Ordering::SeqCst);
    assert!(calls >= 1);
    assert!(calls <= 50, "worker was offered the job {} times", calls);

    let metrics = harness.handle.metrics().await.unwrap();
    assert_eq!(metrics.expired, 1);
    assert_eq!(metrics.requeued as usize, calls);
    harness.stop().await;
}
