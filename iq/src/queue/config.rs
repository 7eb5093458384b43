//! Queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a job may wait undispatched before it fails, in milliseconds
    #[serde(rename = "expiry-ms", default = "default_expiry_ms")]
    pub expiry_ms: u64,

    /// Safety-net scheduling interval, in milliseconds
    #[serde(rename = "tick-interval-ms", default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Channel buffer size for queue requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_expiry_ms() -> u64 {
    debug!("default_expiry_ms: called");
    30_000
}

fn default_tick_interval_ms() -> u64 {
    debug!("default_tick_interval_ms: called");
    50
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            expiry_ms: 30_000,
            tick_interval_ms: 50,
            channel_buffer: 1000,
        }
    }
}

impl QueueConfig {
    /// Job expiry as a Duration
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    /// Tick interval as a Duration, never zero
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
