//! Cache-first facade over the queue

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::item::InspectItem;
use crate::link::InspectLink;
use crate::queue::{QueueHandle, QueueResponse};
use crate::store::ItemStore;

/// Resolves inspect links through an item store, queueing only misses
pub struct Inspector<S: ItemStore> {
    queue: QueueHandle,
    store: S,
}

impl<S: ItemStore> Inspector<S> {
    pub fn new(queue: QueueHandle, store: S) -> Self {
        debug!("Inspector::new: called");
        Self { queue, store }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve one link, serving a stored item when there is one
    pub async fn inspect(&self, link: &str) -> QueueResponse<InspectItem> {
        debug!(%link, "Inspector::inspect: called");
        let link = InspectLink::parse(link)?;

        if let Some(item) = self.store.get(link.asset_id()).await? {
            debug!(asset_id = %link.asset_id(), "Inspector::inspect: store hit");
            return Ok(item);
        }

        let item = self.queue.inspect_link(link).await?;
        if let Err(e) = self.store.put(item.clone()).await {
            warn!(itemid = %item.itemid, error = %e, "Failed to store inspected item");
        }
        Ok(item)
    }

    /// Resolve many links at once
    ///
    /// Duplicate links are inspected once. The returned map has an entry for
    /// every distinct link: the item, or None when its job failed. A malformed
    /// link rejects the whole call before anything is queued.
    pub async fn inspect_many<L: AsRef<str>>(&self, links: &[L]) -> QueueResponse<HashMap<String, Option<InspectItem>>> {
        debug!(count = links.len(), "Inspector::inspect_many: called");
        let mut seen = HashSet::new();
        let mut distinct = Vec::new();
        for raw in links {
            let raw = raw.as_ref();
            if seen.insert(raw.to_string()) {
                distinct.push(InspectLink::parse(raw)?);
            }
        }

        let asset_ids: Vec<String> = distinct.iter().map(|link| link.asset_id().to_string()).collect();
        let cached = self.store.get_many(&asset_ids).await?;

        let mut results: HashMap<String, Option<InspectItem>> = HashMap::with_capacity(distinct.len());
        let mut misses = Vec::new();
        for link in distinct {
            match cached.get(link.asset_id()) {
                Some(item) => {
                    results.insert(link.to_string(), Some(item.clone()));
                }
                None => misses.push(link),
            }
        }

        if misses.is_empty() {
            debug!(hits = results.len(), "Inspector::inspect_many: all links cached");
            return Ok(results);
        }

        info!(hits = results.len(), misses = misses.len(), "Queueing uncached links");
        let outcomes = self.queue.inspect_batch_links(misses).await?;

        let mut resolved = Vec::new();
        for outcome in outcomes {
            let item = outcome.item().cloned();
            if let Some(item) = &item {
                resolved.push(item.clone());
            } else if let Some(e) = outcome.error() {
                debug!(link = %outcome.link, error = %e, "Inspector::inspect_many: link failed");
            }
            results.insert(outcome.link.to_string(), item);
        }

        if !resolved.is_empty()
            && let Err(e) = self.store.put_many(resolved).await
        {
            warn!(error = %e, "Failed to store inspected items");
        }
        Ok(results)
    }
}
