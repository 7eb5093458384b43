//! Main queue task implementation

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::QueueConfig;
use super::handle::QueueHandle;
use super::messages::{QueueEvent, QueueMetrics, QueueRequest};
use crate::item::InspectItem;
use crate::job::{Job, JobError, JobState};
use crate::worker::{Worker, WorkerError, WorkerState};

/// Held for the duration of one scheduling pass; released on drop, so an
/// unwinding pass cannot leave the queue wedged.
struct PassGuard(Arc<AtomicBool>);

impl PassGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self(flag.clone()))
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A registered worker and the job this queue has outstanding on it
struct WorkerSlot {
    worker: Arc<dyn Worker>,
    in_flight: Option<String>,
    /// Set when the worker refused a dispatch; cleared by the next tick or
    /// by any readiness change the worker publishes afterwards
    refused: bool,
    readiness: watch::Receiver<WorkerState>,
    watcher: JoinHandle<()>,
}

impl WorkerSlot {
    fn is_available(&self) -> bool {
        if self.in_flight.is_some() || self.worker.state() != WorkerState::Ready {
            return false;
        }
        !self.refused || self.readiness.has_changed().unwrap_or(false)
    }

    fn mark_refused(&mut self) {
        self.refused = true;
        self.readiness.borrow_and_update();
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// A dispatched job awaiting its worker's answer
struct InFlight {
    job: Job,
    worker: usize,
}

/// Everything the queue task owns. Only touched from inside `Queue::run`.
///
/// Backlog order is deadline order: jobs share the queue's expiry and a
/// refused job goes back to the front, so only the front needs checking.
struct Pool {
    tx: mpsc::Sender<QueueRequest>,
    events: broadcast::Sender<QueueEvent>,
    workers: Vec<WorkerSlot>,
    backlog: VecDeque<Job>,
    in_flight: HashMap<String, InFlight>,
    registrations: Vec<JoinHandle<()>>,
    pass_active: Arc<AtomicBool>,
    metrics: QueueMetrics,
}

impl Pool {
    fn new(tx: mpsc::Sender<QueueRequest>, events: broadcast::Sender<QueueEvent>) -> Self {
        Self {
            tx,
            events,
            workers: Vec::new(),
            backlog: VecDeque::new(),
            in_flight: HashMap::new(),
            registrations: Vec::new(),
            pass_active: Arc::new(AtomicBool::new(false)),
            metrics: QueueMetrics::default(),
        }
    }

    /// Apply one request. Returns false on shutdown.
    fn handle(&mut self, req: QueueRequest) -> bool {
        match req {
            QueueRequest::RegisterWorker { worker } => {
                self.register_worker(worker);
            }

            QueueRequest::WorkerReady { worker } => {
                debug!(worker = %worker.name(), "Worker became ready");
                self.add_worker(worker);
                self.schedule_pass();
            }

            QueueRequest::Submit { job } => {
                debug!(job_id = %job.id(), link = %job.link(), "Job submitted");
                self.metrics.submitted += 1;
                self.backlog.push_back(job);
                self.schedule_pass();
            }

            QueueRequest::SubmitBatch { jobs } => {
                debug!(count = jobs.len(), "Batch submitted");
                self.metrics.submitted += jobs.len() as u64;
                self.backlog.extend(jobs);
                self.schedule_pass();
            }

            QueueRequest::Finished { job_id, result } => {
                self.finish(&job_id, result);
                self.schedule_pass();
            }

            QueueRequest::Schedule => {
                self.schedule_pass();
            }

            QueueRequest::GetMetrics { reply_tx } => {
                let _ = reply_tx.send(self.snapshot());
            }

            QueueRequest::Shutdown => {
                info!("Queue shutting down");
                return false;
            }
        }
        true
    }

    /// Settle a request that was still buffered when the queue stopped
    fn drain(&mut self, req: QueueRequest) {
        match req {
            QueueRequest::Submit { mut job } => {
                self.metrics.submitted += 1;
                self.fail_job(&mut job, JobError::Shutdown);
            }

            QueueRequest::SubmitBatch { jobs } => {
                self.metrics.submitted += jobs.len() as u64;
                for mut job in jobs {
                    self.fail_job(&mut job, JobError::Shutdown);
                }
            }

            QueueRequest::Finished { job_id, result } => {
                self.finish(&job_id, result);
            }

            QueueRequest::GetMetrics { reply_tx } => {
                let _ = reply_tx.send(self.snapshot());
            }

            QueueRequest::RegisterWorker { worker } | QueueRequest::WorkerReady { worker } => {
                debug!(worker = %worker.name(), "Ignoring worker registered after shutdown");
            }

            QueueRequest::Schedule | QueueRequest::Shutdown => {}
        }
    }

    fn register_worker(&mut self, worker: Arc<dyn Worker>) {
        self.registrations.retain(|h| !h.is_finished());

        let state = worker.state();
        if state != WorkerState::Offline {
            debug!(worker = %worker.name(), %state, "Registering worker immediately");
            self.add_worker(worker);
            self.schedule_pass();
            return;
        }

        info!(worker = %worker.name(), "Worker offline, connecting before registration");
        worker.connect();
        let tx = self.tx.clone();
        self.registrations.push(tokio::spawn(async move {
            let ready = worker.ready().await;
            match ready {
                Ok(()) => {
                    if tx.send(QueueRequest::WorkerReady { worker }).await.is_err() {
                        debug!("Queue closed before worker became ready");
                    }
                }
                Err(e) => {
                    warn!(worker = %worker.name(), error = %e, "Worker never became ready");
                }
            }
        }));
    }

    fn add_worker(&mut self, worker: Arc<dyn Worker>) {
        let mut rx = worker.subscribe();
        let tx = self.tx.clone();
        // Every return to Ready (cooldown over, reconnect) earns a pass
        let watcher = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let ready = *rx.borrow_and_update() == WorkerState::Ready;
                if ready && let Err(TrySendError::Closed(_)) = tx.try_send(QueueRequest::Schedule) {
                    break;
                }
            }
        });

        info!(worker = %worker.name(), index = self.workers.len(), "Worker registered");
        let readiness = worker.subscribe();
        self.workers.push(WorkerSlot {
            worker,
            in_flight: None,
            refused: false,
            readiness,
            watcher,
        });
    }

    /// Match Ready workers to the oldest backlog jobs, one job per worker
    fn schedule_pass(&mut self) {
        if self.backlog.is_empty() {
            return;
        }
        let Some(_guard) = PassGuard::acquire(&self.pass_active) else {
            debug!("Pool::schedule_pass: pass already running");
            return;
        };
        self.metrics.passes += 1;

        for index in 0..self.workers.len() {
            if self.backlog.is_empty() {
                break;
            }
            if !self.workers[index].is_available() {
                continue;
            }
            let Some(job) = self.next_created_job(Instant::now()) else {
                break;
            };
            self.dispatch(index, job);
        }
    }

    /// Periodic safety net: forget refusals, expire, then schedule
    fn tick(&mut self, now: Instant) {
        for slot in &mut self.workers {
            slot.refused = false;
        }
        self.expire_due(now);
        self.schedule_pass();
    }

    /// Pop the oldest job still in Created, expiring or discarding any that
    /// can no longer be dispatched
    fn next_created_job(&mut self, now: Instant) -> Option<Job> {
        while let Some(mut job) = self.backlog.pop_front() {
            if job.is_expired(now) {
                self.expire_job(&mut job, now);
                continue;
            }
            if job.state() == JobState::Created {
                return Some(job);
            }
            debug!(job_id = %job.id(), state = %job.state(), "Dropping finished job from backlog");
        }
        None
    }

    fn dispatch(&mut self, index: usize, mut job: Job) {
        if !job.begin() {
            return;
        }

        let job_id = job.id().to_string();
        let link = job.link().clone();
        let slot = &mut self.workers[index];
        let worker = slot.worker.clone();
        slot.in_flight = Some(job_id.clone());
        slot.refused = false;
        debug!(%job_id, %link, worker = %worker.name(), "Dispatching job");

        self.in_flight.insert(job_id.clone(), InFlight { job, worker: index });
        self.metrics.dispatched += 1;

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(worker.process_request(&link))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(WorkerError::Failed(format!("worker {} panicked", worker.name()))));
            if tx.send(QueueRequest::Finished { job_id, result }).await.is_err() {
                debug!(%link, "Queue closed before job finished");
            }
        });
    }

    fn finish(&mut self, job_id: &str, result: Result<InspectItem, WorkerError>) {
        let Some(InFlight { mut job, worker }) = self.in_flight.remove(job_id) else {
            warn!(%job_id, "Finished job is not in flight");
            return;
        };
        let refused = matches!(&result, Err(e) if e.is_not_ready());
        if let Some(slot) = self.workers.get_mut(worker) {
            slot.in_flight = None;
            if refused {
                slot.mark_refused();
            }
        }

        match result {
            Ok(item) => {
                if job.complete(item) {
                    debug!(%job_id, "Job completed");
                    self.metrics.completed += 1;
                    self.emit(QueueEvent::Completed {
                        job_id: job_id.to_string(),
                        link: job.link().clone(),
                    });
                }
            }
            Err(e) if e.is_not_ready() => {
                debug!(%job_id, error = %e, "Worker refused job, requeueing");
                job.requeue();
                self.metrics.requeued += 1;
                let now = Instant::now();
                if job.is_expired(now) {
                    self.expire_job(&mut job, now);
                } else {
                    self.backlog.push_front(job);
                }
            }
            Err(e) => {
                warn!(%job_id, error = %e, "Job failed");
                self.fail_job(&mut job, JobError::Worker(e));
            }
        }
    }

    /// Expire jobs from the front of the backlog until one is still live
    fn expire_due(&mut self, now: Instant) {
        while let Some(front) = self.backlog.front() {
            let live = front.state() == JobState::Created && !front.is_expired(now);
            if live {
                break;
            }
            let Some(mut job) = self.backlog.pop_front() else {
                break;
            };
            self.expire_job(&mut job, now);
        }
    }

    fn expire_job(&mut self, job: &mut Job, now: Instant) {
        if !job.is_expired(now) {
            debug!(job_id = %job.id(), state = %job.state(), "Dropping finished job from backlog");
            return;
        }
        warn!(job_id = %job.id(), link = %job.link(), "Job expired without a worker");
        self.metrics.expired += 1;
        let error = JobError::Expired(job.expiry());
        self.fail_job(job, error);
    }

    /// Fail a job, counting and announcing the transition once
    fn fail_job(&mut self, job: &mut Job, error: JobError) {
        if !job.fail(error.clone()) {
            return;
        }
        self.metrics.failed += 1;
        self.emit(QueueEvent::Failed {
            job_id: job.id().to_string(),
            link: job.link().clone(),
            error,
        });
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Deadline of the oldest live job, which is the earliest one
    fn next_deadline(&self) -> Option<Instant> {
        self.backlog
            .iter()
            .find(|job| job.state() == JobState::Created)
            .map(Job::deadline)
    }

    fn snapshot(&self) -> QueueMetrics {
        QueueMetrics {
            registered_workers: self.workers.len(),
            ready_workers: self
                .workers
                .iter()
                .filter(|slot| slot.worker.state() == WorkerState::Ready)
                .count(),
            backlog: self.backlog.len(),
            in_flight: self.in_flight.len(),
            ..self.metrics.clone()
        }
    }

    fn shutdown(&mut self) {
        for handle in self.registrations.drain(..) {
            handle.abort();
        }

        let outstanding = self.backlog.len() + self.in_flight.len();
        if outstanding > 0 {
            info!(outstanding, "Failing outstanding jobs on shutdown");
        }
        let backlog: Vec<Job> = self.backlog.drain(..).collect();
        let in_flight: Vec<Job> = self.in_flight.drain().map(|(_, entry)| entry.job).collect();
        for mut job in backlog.into_iter().chain(in_flight) {
            self.fail_job(&mut job, JobError::Shutdown);
        }

        self.workers.clear();
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// The queue task: owns the backlog and worker pool, driven by messages
pub struct Queue {
    config: QueueConfig,
    tx: mpsc::Sender<QueueRequest>,
    rx: mpsc::Receiver<QueueRequest>,
    events: broadcast::Sender<QueueEvent>,
}

impl Queue {
    /// Create a new Queue with the given configuration
    pub fn new(config: QueueConfig) -> Self {
        debug!(?config, "Queue::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let (events, _) = broadcast::channel(64);
        Self { config, tx, rx, events }
    }

    /// Get a sender for raw requests
    pub fn sender(&self) -> mpsc::Sender<QueueRequest> {
        self.tx.clone()
    }

    /// Create a client handle
    pub fn handle(&self) -> QueueHandle {
        QueueHandle::new(self.tx.clone(), self.events.clone(), self.config.expiry())
    }

    /// Spawn the queue task and return a handle to it
    pub fn spawn(config: QueueConfig) -> (QueueHandle, JoinHandle<()>) {
        let queue = Self::new(config);
        let handle = queue.handle();
        (handle, tokio::spawn(queue.run()))
    }

    /// Run the queue task
    ///
    /// This consumes the Queue and runs until shutdown is requested. Job
    /// callbacks run on this task and must not block.
    pub async fn run(mut self) {
        let mut pool = Pool::new(self.tx.clone(), self.events.clone());
        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(expiry = ?self.config.expiry(), tick = ?self.config.tick_interval(), "Queue started");

        loop {
            let next_deadline = pool.next_deadline();
            tokio::select! {
                req = self.rx.recv() => {
                    let Some(req) = req else {
                        break;
                    };
                    if !pool.handle(req) {
                        break;
                    }
                }

                _ = tick.tick() => {
                    pool.tick(Instant::now());
                }

                _ = sleep_until_deadline(next_deadline) => {
                    pool.expire_due(Instant::now());
                }
            }
        }

        // Anything already accepted into the channel still gets its one callback
        self.rx.close();
        while let Ok(req) = self.rx.try_recv() {
            pool.drain(req);
        }

        pool.shutdown();
        info!("Queue stopped");
    }
}
