//! Read-through item cache.
//!
//! Exposure requests hit the cache first and fall back to the durable store on
//! a miss. Cache failures are never fatal: callers log them and treat them as
//! misses.

use crate::error::StoreResult;
use crate::store::BoxFuture;
use crate::types::{Item, ItemId};
use std::time::Duration;

/// Cache of [`Item`] values keyed by id.
pub trait ItemCache: Send + Sync {
    /// Load a cached item.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Cache` or `StoreError::Serialization` on failure.
    fn get(&self, item_id: ItemId) -> BoxFuture<'_, StoreResult<Option<Item>>>;

    /// Store an item for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Cache` or `StoreError::Serialization` on failure.
    fn put(&self, item: &Item, ttl: Duration) -> BoxFuture<'_, StoreResult<()>>;
}

/// Cache key of an item.
#[must_use]
pub fn item_key(item_id: ItemId) -> String {
    format!("item:{item_id}")
}
