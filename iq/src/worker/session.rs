//! Single-flight session worker
//!
//! Wraps an `InspectBackend` with the readiness discipline the queue relies
//! on: one request at a time, a bounded wait for the answer, and a cooldown
//! before the session is offered again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::state::{WorkerError, WorkerState};
use super::traits::{InspectBackend, Worker};
use crate::item::InspectItem;
use crate::link::InspectLink;

/// Returns a Busy worker to Ready after the cooldown, even if the request
/// future is dropped halfway.
struct Cooldown {
    state: Arc<watch::Sender<WorkerState>>,
    in_request: Arc<AtomicBool>,
    delay: Duration,
}

impl Drop for Cooldown {
    fn drop(&mut self) {
        let state = self.state.clone();
        let in_request = self.in_request.clone();
        let delay = self.delay;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !delay.is_zero() => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    release(&state, &in_request);
                });
            }
            _ => release(&state, &in_request),
        }
    }
}

/// End of the request window. Busy -> Ready, leaving Offline untouched.
fn release(state: &watch::Sender<WorkerState>, in_request: &AtomicBool) {
    state.send_if_modified(|s| {
        in_request.store(false, Ordering::Release);
        if *s == WorkerState::Busy {
            *s = WorkerState::Ready;
            true
        } else {
            false
        }
    });
}

/// Offline -> Ready, or Offline -> Busy while a request window is still open
fn come_online(state: &watch::Sender<WorkerState>, in_request: &AtomicBool) -> bool {
    state.send_if_modified(|s| {
        if *s != WorkerState::Offline {
            return false;
        }
        *s = if in_request.load(Ordering::Acquire) {
            WorkerState::Busy
        } else {
            WorkerState::Ready
        };
        true
    })
}

/// A worker backed by one remote session
pub struct SessionWorker<B: InspectBackend> {
    name: String,
    config: WorkerConfig,
    backend: Arc<B>,
    state: Arc<watch::Sender<WorkerState>>,
    /// Set from claim until the cooldown releases; only read or written
    /// inside `send_if_modified` so it moves together with the state
    in_request: Arc<AtomicBool>,
}

impl<B: InspectBackend> SessionWorker<B> {
    /// Create an offline worker
    pub fn new(name: impl Into<String>, backend: B, config: WorkerConfig) -> Self {
        let name = name.into();
        debug!(%name, ?config, "SessionWorker::new: called");
        let (state, _) = watch::channel(WorkerState::Offline);
        Self {
            name,
            config,
            backend: Arc::new(backend),
            state: Arc::new(state),
            in_request: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Session layer signal: the session is usable again
    ///
    /// A request still running from before the drop keeps the worker Busy
    /// until its cooldown ends.
    pub fn mark_ready(&self) {
        debug!(worker = %self.name, "SessionWorker::mark_ready: called");
        come_online(&self.state, &self.in_request);
    }

    /// Session layer signal: the session dropped
    pub fn mark_offline(&self) {
        info!(worker = %self.name, "Session went offline");
        self.state.send_replace(WorkerState::Offline);
    }

    /// Ready -> Busy in one step, so two callers can never both win
    fn claim(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == WorkerState::Ready {
                *s = WorkerState::Busy;
                self.in_request.store(true, Ordering::Release);
                true
            } else {
                false
            }
        })
    }
}

#[async_trait]
impl<B: InspectBackend> Worker for SessionWorker<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    fn connect(&self) {
        debug!(worker = %self.name, "SessionWorker::connect: called");
        if *self.state.borrow() != WorkerState::Offline {
            debug!(worker = %self.name, "SessionWorker::connect: already connected");
            return;
        }

        let name = self.name.clone();
        let backend = self.backend.clone();
        let state = self.state.clone();
        let in_request = self.in_request.clone();
        let settle = self.config.ready_delay();
        tokio::spawn(async move {
            info!(worker = %name, "Connecting");
            match backend.connect().await {
                Ok(()) => {
                    debug!(worker = %name, ?settle, "Connected, settling before ready");
                    tokio::time::sleep(settle).await;
                    if come_online(&state, &in_request) {
                        info!(worker = %name, state = %*state.borrow(), "Online");
                    }
                }
                Err(e) => {
                    warn!(worker = %name, error = %e, "Connect failed, staying offline");
                }
            }
        });
    }

    async fn process_request(&self, link: &InspectLink) -> Result<InspectItem, WorkerError> {
        debug!(worker = %self.name, %link, "SessionWorker::process_request: called");
        if !self.claim() {
            let state = *self.state.borrow();
            debug!(worker = %self.name, %state, "SessionWorker::process_request: not ready, rejecting");
            return Err(WorkerError::NotReady {
                worker: self.name.clone(),
                state,
            });
        }

        let _cooldown = Cooldown {
            state: self.state.clone(),
            in_request: self.in_request.clone(),
            delay: self.config.request_delay(),
        };

        let ttl = self.config.request_ttl();
        match tokio::time::timeout(ttl, self.backend.inspect(link)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(worker = %self.name, %link, ?ttl, "Request timed out");
                Err(WorkerError::Timeout(ttl))
            }
        }
    }
}
