//! Workers the queue dispatches to
//!
//! The queue consumes the narrow [`Worker`] trait. [`SessionWorker`] is the
//! stock implementation: it layers single-flight, timeout and cooldown rules
//! over any [`InspectBackend`].

mod config;
mod session;
mod simulated;
mod state;
mod traits;

pub use config::WorkerConfig;
pub use session::SessionWorker;
pub use simulated::{SimulatedBackend, simulated_item};
pub use state::{WorkerError, WorkerState};
pub use traits::{InspectBackend, Worker};
