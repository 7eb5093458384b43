//! Batch aggregation over individually queued jobs

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::job::{Job, JobCallback, JobError, JobOutcome};

/// Invoked once with one outcome per submitted link, in submission order
pub type BatchCallback = Box<dyn FnOnce(Vec<JobOutcome>) + Send + 'static>;

struct BatchState {
    slots: Vec<Option<JobOutcome>>,
    remaining: usize,
    on_done: Option<BatchCallback>,
}

/// Shared completion counter for a group of jobs
///
/// Each job gets its own slot callback. The aggregate callback fires after the
/// last slot is filled; a failed job fills its slot like any other.
#[derive(Clone)]
pub struct Batch {
    inner: Arc<Mutex<BatchState>>,
}

impl Batch {
    /// Create a batch of `size` jobs. An empty batch resolves immediately.
    pub fn new(size: usize, on_done: Option<BatchCallback>) -> Self {
        debug!(size, "Batch::new: called");
        let batch = Self {
            inner: Arc::new(Mutex::new(BatchState {
                slots: (0..size).map(|_| None).collect(),
                remaining: size,
                on_done,
            })),
        };
        if size == 0 {
            batch.resolve();
        }
        batch
    }

    /// Number of jobs still outstanding
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    /// Job callback that fills `slot`
    pub fn callback(&self, slot: usize) -> JobCallback {
        let batch = self.clone();
        Box::new(move |_err: Option<&JobError>, job: &Job| match job.outcome() {
            Some(outcome) => batch.record(slot, outcome),
            None => warn!(job_id = %job.id(), slot, "Batch slot callback fired for a live job"),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        // Slot callbacks never panic while holding the lock
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, slot: usize, outcome: JobOutcome) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.slots.get_mut(slot) {
                None => {
                    warn!(slot, "Batch slot out of range, ignoring");
                    return;
                }
                Some(entry) if entry.is_some() => {
                    warn!(slot, "Batch slot already filled, ignoring");
                    return;
                }
                Some(entry) => *entry = Some(outcome),
            }
            state.remaining -= 1;
            debug!(slot, remaining = state.remaining, "Batch::record: slot filled");
            if state.remaining > 0 {
                return;
            }
        }
        self.resolve();
    }

    fn resolve(&self) {
        let (on_done, outcomes) = {
            let mut state = self.lock();
            let outcomes: Vec<JobOutcome> = state.slots.iter_mut().filter_map(Option::take).collect();
            (state.on_done.take(), outcomes)
        };
        debug!(count = outcomes.len(), "Batch::resolve: all jobs finished");
        if let Some(on_done) = on_done {
            on_done(outcomes);
        }
    }
}
