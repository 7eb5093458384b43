//! inspectq - Single-flight worker pool scheduler for inspect requests
//!
//! Inspect requests are queued as jobs and dispatched across a pool of
//! stateful session workers, each of which handles at most one request at a
//! time and moves between Offline, Ready and Busy on its own schedule.
//!
//! # Modules
//!
//! - [`link`] - Inspect link parsing and generation
//! - [`job`] - Job lifecycle and completion callbacks
//! - [`batch`] - Wait-for-all aggregation over many jobs
//! - [`worker`] - Worker trait, session worker and simulated backend
//! - [`queue`] - The scheduler task and its handle
//! - [`store`] - Item store seam and in-memory store
//! - [`inspector`] - Cache-first facade over queue and store
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod batch;
pub mod cli;
pub mod config;
pub mod inspector;
pub mod item;
pub mod job;
pub mod link;
pub mod queue;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use batch::{Batch, BatchCallback};
pub use config::Config;
pub use inspector::Inspector;
pub use item::{InspectItem, Sticker};
pub use job::{Job, JobCallback, JobError, JobOutcome, JobState};
pub use link::{InspectLink, LinkError, LinkOwner};
pub use queue::{Queue, QueueConfig, QueueError, QueueEvent, QueueHandle, QueueMetrics, QueueRequest, QueueResponse};
pub use store::{ItemStore, MemoryStore, StoreError};
pub use worker::{InspectBackend, SessionWorker, SimulatedBackend, Worker, WorkerConfig, WorkerError, WorkerState};
