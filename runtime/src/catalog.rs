//! Read-through item lookups.

use flashsale_core::cache::ItemCache;
use flashsale_core::error::StoreResult;
use flashsale_core::store::InventoryStore;
use flashsale_core::types::{Item, ItemId};
use std::sync::Arc;
use std::time::Duration;

/// Item lookups that consult the cache before the durable store.
///
/// Cache failures never fail a lookup: they are logged and treated as a
/// miss. Cached snapshots are only used for window checks and display; stock
/// that matters is always read from the durable store.
#[derive(Clone)]
pub struct ItemCatalog {
    inventory: Arc<dyn InventoryStore>,
    cache: Arc<dyn ItemCache>,
    ttl: Duration,
}

impl ItemCatalog {
    /// Catalog over `inventory`, caching snapshots in `cache` for `ttl`.
    #[must_use]
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        cache: Arc<dyn ItemCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            inventory,
            cache,
            ttl,
        }
    }

    /// Cached item, loading and caching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the durable store's error on a miss.
    pub async fn item(&self, item_id: ItemId) -> StoreResult<Option<Item>> {
        match self.cache.get(item_id).await {
            Ok(Some(item)) => {
                metrics::counter!("flashsale.cache.hits").increment(1);
                return Ok(Some(item));
            }
            Ok(None) => metrics::counter!("flashsale.cache.misses").increment(1),
            Err(err) => {
                tracing::warn!(item_id = %item_id, error = %err, "Item cache read failed");
            }
        }

        let Some(item) = self.inventory.find_item(item_id).await? else {
            return Ok(None);
        };
        if let Err(err) = self.cache.put(&item, self.ttl).await {
            tracing::warn!(item_id = %item_id, error = %err, "Item cache write failed");
        }
        Ok(Some(item))
    }

    /// Item straight from the durable store.
    ///
    /// # Errors
    ///
    /// Returns the durable store's error.
    pub async fn authoritative(&self, item_id: ItemId) -> StoreResult<Option<Item>> {
        self.inventory.find_item(item_id).await
    }

    /// Page of items, newest first.
    ///
    /// # Errors
    ///
    /// Returns the durable store's error.
    pub async fn list(&self, offset: u32, limit: u32) -> StoreResult<Vec<Item>> {
        self.inventory.list_items(offset, limit).await
    }
}
