//! Job queue and worker-pool scheduler
//!
//! A single task owns the FIFO backlog, the registered workers and the jobs in
//! flight. Everything else talks to it through [`QueueHandle`]:
//! - **Submit:** enqueue one link or a batch
//! - **Register:** add a worker, waiting for its first Ready if needed
//! - **Schedule:** internal; posted on submissions, completions and readiness
//!   changes, plus a periodic tick

mod config;
mod core;
mod handle;
mod messages;

pub use config::QueueConfig;
pub use core::Queue;
pub use handle::QueueHandle;
pub use messages::{QueueError, QueueEvent, QueueMetrics, QueueRequest, QueueResponse};
