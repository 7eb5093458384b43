//! Item store seam
//!
//! Callers consult a store before queueing a link and fill it after a job
//! completes. The queue itself never touches it.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::item::InspectItem;

/// Errors from item stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Backend(String),
}

/// Cache of resolved items keyed by asset id
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Look up one item
    async fn get(&self, asset_id: &str) -> Result<Option<InspectItem>, StoreError>;

    /// Look up several items; missing ids are absent from the map
    async fn get_many(&self, asset_ids: &[String]) -> Result<HashMap<String, InspectItem>, StoreError> {
        let mut found = HashMap::new();
        for asset_id in asset_ids {
            if let Some(item) = self.get(asset_id).await? {
                found.insert(asset_id.clone(), item);
            }
        }
        Ok(found)
    }

    /// Insert or replace one item
    async fn put(&self, item: InspectItem) -> Result<(), StoreError>;

    /// Insert or replace several items
    async fn put_many(&self, items: Vec<InspectItem>) -> Result<(), StoreError> {
        for item in items {
            self.put(item).await?;
        }
        Ok(())
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, InspectItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn get(&self, asset_id: &str) -> Result<Option<InspectItem>, StoreError> {
        debug!(%asset_id, "MemoryStore::get: called");
        Ok(self.items.read().await.get(asset_id).cloned())
    }

    async fn get_many(&self, asset_ids: &[String]) -> Result<HashMap<String, InspectItem>, StoreError> {
        debug!(count = asset_ids.len(), "MemoryStore::get_many: called");
        let items = self.items.read().await;
        Ok(asset_ids
            .iter()
            .filter_map(|id| items.get(id).map(|item| (id.clone(), item.clone())))
            .collect())
    }

    async fn put(&self, item: InspectItem) -> Result<(), StoreError> {
        debug!(itemid = %item.itemid, "MemoryStore::put: called");
        self.items.write().await.insert(item.itemid.clone(), item);
        Ok(())
    }

    async fn put_many(&self, items: Vec<InspectItem>) -> Result<(), StoreError> {
        debug!(count = items.len(), "MemoryStore::put_many: called");
        let mut stored = self.items.write().await;
        for item in items {
            stored.insert(item.itemid.clone(), item);
        }
        Ok(())
    }
}
