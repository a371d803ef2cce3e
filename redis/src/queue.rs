//! Redis implementation of [`QueueStore`].
//!
//! Lists map onto `RPUSH`/`LPOP`/`LLEN`/`LPOS`/`LRANGE`, the admitted-buyer
//! set onto `SADD`/`SREM`/`SISMEMBER`. Every one of those is atomic on a
//! single Redis node. Slot initialization touches two keys and runs as a Lua
//! script so no second caller can observe the marker without the tickets.

use flashsale_core::error::{StoreError, StoreResult};
use flashsale_core::queue::QueueStore;
use flashsale_core::store::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

/// `KEYS[1]` marker, `KEYS[2]` list, `ARGV` tickets. Returns 1 for the caller
/// that filled the list, 0 for everyone else.
const INITIALIZE_ONCE: &str = r"
    if redis.call('SET', KEYS[1], '1', 'NX') then
        for i = 1, #ARGV do
            redis.call('RPUSH', KEYS[2], ARGV[i])
        end
        return 1
    end
    return 0
";

fn queue_error(e: &RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Queue(e.to_string())
    }
}

/// Queue store over a shared Redis connection manager.
///
/// Cloning is cheap; clones multiplex over the same connection.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn_manager: ConnectionManager,
    initialize_once: Script,
}

impl RedisQueueStore {
    /// Queue store over `conn_manager`.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            initialize_once: Script::new(INITIALIZE_ONCE),
        }
    }
}

impl QueueStore for RedisQueueStore {
    fn push_back(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<u64>> {
        let mut conn = self.conn_manager.clone();
        let (key, value) = (key.to_owned(), value.to_owned());
        Box::pin(async move {
            conn.rpush::<_, _, u64>(&key, &value)
                .await
                .map_err(|e| queue_error(&e))
        })
    }

    fn pop_front(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<String>>> {
        let mut conn = self.conn_manager.clone();
        let key = key.to_owned();
        Box::pin(async move {
            conn.lpop::<_, Option<String>>(&key, None)
                .await
                .map_err(|e| queue_error(&e))
        })
    }

    fn len(&self, key: &str) -> BoxFuture<'_, StoreResult<u64>> {
        let mut conn = self.conn_manager.clone();
        let key = key.to_owned();
        Box::pin(async move {
            conn.llen::<_, u64>(&key)
                .await
                .map_err(|e| queue_error(&e))
        })
    }

    fn contains(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let mut conn = self.conn_manager.clone();
        let (key, value) = (key.to_owned(), value.to_owned());
        Box::pin(async move {
            let position: Option<i64> = redis::cmd("LPOS")
                .arg(&key)
                .arg(&value)
                .query_async(&mut conn)
                .await
                .map_err(|e| queue_error(&e))?;
            Ok(position.is_some())
        })
    }

    fn range(&self, key: &str) -> BoxFuture<'_, StoreResult<Vec<String>>> {
        let mut conn = self.conn_manager.clone();
        let key = key.to_owned();
        Box::pin(async move {
            conn.lrange::<_, Vec<String>>(&key, 0, -1)
                .await
                .map_err(|e| queue_error(&e))
        })
    }

    fn exists(&self, key: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let mut conn = self.conn_manager.clone();
        let key = key.to_owned();
        Box::pin(async move {
            conn.exists::<_, bool>(&key)
                .await
                .map_err(|e| queue_error(&e))
        })
    }

    fn initialize_once(
        &self,
        marker_key: &str,
        list_key: &str,
        values: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        let mut conn = self.conn_manager.clone();
        let (marker_key, list_key) = (marker_key.to_owned(), list_key.to_owned());
        Box::pin(async move {
            let count = values.len();
            let pushed: i64 = self
                .initialize_once
                .key(&marker_key)
                .key(&list_key)
                .arg(values)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| queue_error(&e))?;

            if pushed == 1 {
                tracing::debug!(key = %list_key, count, "Slot queue filled");
            }
            Ok(pushed == 1)
        })
    }

    fn add_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let mut conn = self.conn_manager.clone();
        let (key, value) = (key.to_owned(), value.to_owned());
        Box::pin(async move {
            let added: u64 = conn.sadd(&key, &value).await.map_err(|e| queue_error(&e))?;
            Ok(added > 0)
        })
    }

    fn remove_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let mut conn = self.conn_manager.clone();
        let (key, value) = (key.to_owned(), value.to_owned());
        Box::pin(async move {
            let removed: u64 = conn.srem(&key, &value).await.map_err(|e| queue_error(&e))?;
            Ok(removed > 0)
        })
    }

    fn is_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let mut conn = self.conn_manager.clone();
        let (key, value) = (key.to_owned(), value.to_owned());
        Box::pin(async move {
            conn.sismember::<_, _, bool>(&key, &value)
                .await
                .map_err(|e| queue_error(&e))
        })
    }
}
