//! In-process backend for demos and tests

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::state::WorkerError;
use super::traits::InspectBackend;
use crate::item::{InspectItem, Sticker};
use crate::link::InspectLink;

/// Answers every inspect request locally after a fixed latency
///
/// Items are derived from the asset id, so the same link always yields the
/// same item.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failure_rate: 0.0,
        }
    }

    /// Fail this fraction of requests (clamped to 0.0..=1.0)
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }
}

/// Stable seed from the asset id digits
fn seed_for(asset_id: &str) -> u64 {
    asset_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

pub fn simulated_item(link: &InspectLink) -> InspectItem {
    let seed = seed_for(link.asset_id());
    let mut item = InspectItem::new(link.asset_id());
    item.defindex = (seed % 64) as u32 + 1;
    item.paintindex = (seed >> 8) as u32 % 1000;
    item.rarity = (seed >> 20) as u32 % 7;
    item.quality = 4;
    item.paintwear = ((seed >> 24) % 1_000_000) as f64 / 1_000_000.0;
    item.paintseed = (seed >> 32) as u32 % 1000;
    item.inventory = 3;
    item.origin = 8;
    if seed % 5 == 0 {
        item.stickers.push(Sticker {
            slot: 0,
            sticker_id: (seed >> 40) as u32 % 5000,
            wear: None,
        });
    }
    item
}

#[async_trait]
impl InspectBackend for SimulatedBackend {
    async fn connect(&self) -> Result<(), WorkerError> {
        debug!("SimulatedBackend::connect: called");
        Ok(())
    }

    async fn inspect(&self, link: &InspectLink) -> Result<InspectItem, WorkerError> {
        debug!(%link, latency = ?self.latency, "SimulatedBackend::inspect: called");
        tokio::time::sleep(self.latency).await;

        let fail = self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate);
        if fail {
            debug!(%link, "SimulatedBackend::inspect: injected failure");
            return Err(WorkerError::Failed(format!("simulated failure for {}", link.asset_id())));
        }

        Ok(simulated_item(link))
    }
}
