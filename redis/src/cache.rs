//! Redis implementation of [`ItemCache`].

use flashsale_core::cache::{ItemCache, item_key};
use flashsale_core::error::{StoreError, StoreResult};
use flashsale_core::store::BoxFuture;
use flashsale_core::types::{Item, ItemId};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Item snapshots stored as bincode under `item:<id>` with `SET EX`.
#[derive(Clone)]
pub struct RedisItemCache {
    conn_manager: ConnectionManager,
}

impl RedisItemCache {
    /// Item cache over `conn_manager`.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

impl ItemCache for RedisItemCache {
    fn get(&self, item_id: ItemId) -> BoxFuture<'_, StoreResult<Option<Item>>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let bytes: Option<Vec<u8>> = conn
                .get(item_key(item_id))
                .await
                .map_err(|e| StoreError::Cache(format!("Failed to read item: {e}")))?;

            bytes
                .map(|bytes| {
                    bincode::deserialize(&bytes)
                        .map_err(|e| StoreError::Serialization(e.to_string()))
                })
                .transpose()
        })
    }

    fn put(&self, item: &Item, ttl: Duration) -> BoxFuture<'_, StoreResult<()>> {
        let mut conn = self.conn_manager.clone();
        let key = item_key(item.id);
        let encoded =
            bincode::serialize(item).map_err(|e| StoreError::Serialization(e.to_string()));
        Box::pin(async move {
            let bytes = encoded?;
            // SET EX rejects 0
            let ttl_seconds = ttl.as_secs().max(1);
            conn.set_ex::<_, _, ()>(&key, bytes, ttl_seconds)
                .await
                .map_err(|e| StoreError::Cache(format!("Failed to write item: {e}")))?;

            tracing::debug!(key = %key, ttl_seconds, "Item cached");
            Ok(())
        })
    }
}
