//! In-memory item cache for testing.

use flashsale_core::cache::ItemCache;
use flashsale_core::error::{StoreError, StoreResult};
use flashsale_core::store::BoxFuture;
use flashsale_core::types::{Item, ItemId};
use std::collections::HashMap;
use std::future::ready;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// In-memory [`ItemCache`] with TTL expiry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryItemCache {
    entries: Arc<Mutex<HashMap<ItemId, (Item, Instant)>>>,
    unavailable: Arc<AtomicBool>,
    puts: Arc<AtomicU64>,
}

impl InMemoryItemCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `put` calls.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Cache("cache offline".to_string()));
        }
        Ok(())
    }
}

impl ItemCache for InMemoryItemCache {
    fn get(&self, item_id: ItemId) -> BoxFuture<'_, StoreResult<Option<Item>>> {
        let result = self.check_available().and_then(|()| {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| StoreError::Cache("Mutex lock failed".to_string()))?;
            match entries.get(&item_id) {
                Some((item, expires_at)) if *expires_at > Instant::now() => Ok(Some(item.clone())),
                Some(_) => {
                    entries.remove(&item_id);
                    Ok(None)
                }
                None => Ok(None),
            }
        });
        Box::pin(ready(result))
    }

    fn put(&self, item: &Item, ttl: Duration) -> BoxFuture<'_, StoreResult<()>> {
        let result = self.check_available().and_then(|()| {
            self.entries
                .lock()
                .map_err(|_| StoreError::Cache("Mutex lock failed".to_string()))?
                .insert(item.id, (item.clone(), Instant::now() + ttl));
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Box::pin(ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{open_item, test_epoch};

    #[tokio::test]
    async fn put_then_get() {
        let cache = InMemoryItemCache::new();
        let item = open_item(1000, 5, test_epoch());
        cache.put(&item, Duration::from_secs(60)).await.ok();
        assert_eq!(cache.get(item.id).await, Ok(Some(item)));
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = InMemoryItemCache::new();
        let item = open_item(1000, 5, test_epoch());
        cache.put(&item, Duration::ZERO).await.ok();
        assert_eq!(cache.get(item.id).await, Ok(None));
    }
}
