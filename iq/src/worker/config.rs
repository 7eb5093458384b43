//! Session worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request timing for a session worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How long to wait for an inspect response, in milliseconds
    #[serde(rename = "request-ttl-ms", default = "default_request_ttl_ms")]
    pub request_ttl_ms: u64,

    /// Cooldown after every request before the worker is Ready again, in milliseconds
    #[serde(rename = "request-delay-ms", default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Settle time between a successful connect and Ready, in milliseconds
    #[serde(rename = "ready-delay-ms", default = "default_ready_delay_ms")]
    pub ready_delay_ms: u64,
}

fn default_request_ttl_ms() -> u64 {
    10_000
}

fn default_request_delay_ms() -> u64 {
    2_000
}

fn default_ready_delay_ms() -> u64 {
    5_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_ttl_ms: default_request_ttl_ms(),
            request_delay_ms: default_request_delay_ms(),
            ready_delay_ms: default_ready_delay_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn request_ttl(&self) -> Duration {
        Duration::from_millis(self.request_ttl_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }
}
