//! Redis adapters for flash-sale admission control.
//!
//! - [`RedisQueueStore`]: the per-item slot, wait, results and failure lists
//!   plus the admitted-buyer set, all as single-key atomic Redis commands
//! - [`RedisItemCache`]: bincode-serialized item snapshots under `item:<id>`
//!   with a TTL
//!
//! Both share one multiplexed [`ConnectionManager`], which reconnects on its
//! own after a dropped connection.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_redis::{RedisItemCache, RedisQueueStore, connect};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = connect("redis://127.0.0.1:6379").await?;
//! let queues = RedisQueueStore::new(manager.clone());
//! let cache = RedisItemCache::new(manager);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod queue;

pub use cache::RedisItemCache;
pub use queue::RedisQueueStore;
pub use redis::aio::ConnectionManager;

use flashsale_core::error::{StoreError, StoreResult};
use redis::Client;

/// Open a connection manager for `redis_url`.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the URL is invalid or Redis cannot
/// be reached.
pub async fn connect(redis_url: &str) -> StoreResult<ConnectionManager> {
    let client = Client::open(redis_url)
        .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {e}")))?;

    let manager = ConnectionManager::new(client).await.map_err(|e| {
        StoreError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
    })?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
