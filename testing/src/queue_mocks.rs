//! In-memory queue store for testing.

use flashsale_core::error::{StoreError, StoreResult};
use flashsale_core::queue::QueueStore;
use flashsale_core::store::BoxFuture;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::ready;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct QueueState {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
    markers: HashSet<String>,
}

impl QueueState {
    fn key_exists(&self, key: &str) -> bool {
        self.lists.contains_key(key) || self.sets.contains_key(key) || self.markers.contains(key)
    }
}

/// In-memory queue store for testing.
///
/// Every command takes a single lock over the whole keyspace, so each command
/// is atomic, matching a single-node Redis. Like Redis, a list that becomes
/// empty stops existing.
///
/// Call [`InMemoryQueueStore::set_unavailable`] to make every command fail
/// with [`StoreError::Unavailable`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueStore {
    state: Arc<Mutex<QueueState>>,
    unavailable: Arc<AtomicBool>,
    commands: Arc<AtomicU64>,
}

impl InMemoryQueueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent command fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of commands served so far.
    #[must_use]
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    /// Snapshot of a list, head first (empty when missing).
    #[must_use]
    pub fn list_snapshot(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.lists.get(key).map(|list| list.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Run `f` against the state, honouring the availability switch.
    fn with_state<T>(&self, f: impl FnOnce(&mut QueueState) -> T) -> StoreResult<T> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("queue store offline".to_string()));
        }
        self.commands.fetch_add(1, Ordering::SeqCst);
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Queue("Mutex lock failed".to_string()))?;
        Ok(f(&mut *state))
    }
}

impl QueueStore for InMemoryQueueStore {
    fn push_back(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<u64>> {
        let result = self.with_state(|state| {
            let list = state.lists.entry(key.to_string()).or_default();
            list.push_back(value.to_string());
            list.len() as u64
        });
        Box::pin(ready(result))
    }

    fn pop_front(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<String>>> {
        let result = self.with_state(|state| {
            let list = state.lists.get_mut(key)?;
            let head = list.pop_front();
            if list.is_empty() {
                state.lists.remove(key);
            }
            head
        });
        Box::pin(ready(result))
    }

    fn len(&self, key: &str) -> BoxFuture<'_, StoreResult<u64>> {
        let result = self.with_state(|state| state.lists.get(key).map_or(0, |list| list.len() as u64));
        Box::pin(ready(result))
    }

    fn contains(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let result = self.with_state(|state| {
            state
                .lists
                .get(key)
                .is_some_and(|list| list.iter().any(|entry| entry == value))
        });
        Box::pin(ready(result))
    }

    fn range(&self, key: &str) -> BoxFuture<'_, StoreResult<Vec<String>>> {
        let result = self.with_state(|state| {
            state
                .lists
                .get(key)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default()
        });
        Box::pin(ready(result))
    }

    fn exists(&self, key: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let result = self.with_state(|state| state.key_exists(key));
        Box::pin(ready(result))
    }

    fn initialize_once(
        &self,
        marker_key: &str,
        list_key: &str,
        values: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        let result = self.with_state(|state| {
            if !state.markers.insert(marker_key.to_string()) {
                return false;
            }
            if !values.is_empty() {
                state
                    .lists
                    .entry(list_key.to_string())
                    .or_default()
                    .extend(values);
            }
            true
        });
        Box::pin(ready(result))
    }

    fn add_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let result = self.with_state(|state| {
            state
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(value.to_string())
        });
        Box::pin(ready(result))
    }

    fn remove_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let result = self.with_state(|state| {
            let Some(set) = state.sets.get_mut(key) else {
                return false;
            };
            let removed = set.remove(value);
            if set.is_empty() {
                state.sets.remove(key);
            }
            removed
        });
        Box::pin(ready(result))
    }

    fn is_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let result = self.with_state(|state| state.sets.get(key).is_some_and(|set| set.contains(value)));
        Box::pin(ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pop_is_fifo_and_empty_list_disappears() {
        let store = InMemoryQueueStore::new();
        store.push_back("waitQueue:1", "a").await.ok();
        store.push_back("waitQueue:1", "b").await.ok();

        assert_eq!(store.pop_front("waitQueue:1").await, Ok(Some("a".to_string())));
        assert_eq!(store.pop_front("waitQueue:1").await, Ok(Some("b".to_string())));
        assert_eq!(store.pop_front("waitQueue:1").await, Ok(None));
        assert_eq!(store.exists("waitQueue:1").await, Ok(false));
    }

    #[tokio::test]
    async fn initialize_once_pushes_exactly_once() {
        let store = InMemoryQueueStore::new();
        let tickets = vec!["0".to_string(), "1".to_string()];

        assert_eq!(store.initialize_once("slotInit:1", "slotQueue:1", tickets.clone()).await, Ok(true));
        assert_eq!(store.initialize_once("slotInit:1", "slotQueue:1", tickets).await, Ok(false));
        assert_eq!(store.len("slotQueue:1").await, Ok(2));
    }

    #[tokio::test]
    async fn marker_survives_drained_list() {
        let store = InMemoryQueueStore::new();
        store
            .initialize_once("slotInit:1", "slotQueue:1", vec!["0".to_string()])
            .await
            .ok();
        store.pop_front("slotQueue:1").await.ok();

        assert_eq!(store.exists("slotQueue:1").await, Ok(false));
        assert_eq!(store.exists("slotInit:1").await, Ok(true));
    }

    #[tokio::test]
    async fn set_membership() {
        let store = InMemoryQueueStore::new();
        assert_eq!(store.add_member("admittedSet:1", "user:7").await, Ok(true));
        assert_eq!(store.add_member("admittedSet:1", "user:7").await, Ok(false));
        assert_eq!(store.is_member("admittedSet:1", "user:7").await, Ok(true));
        assert_eq!(store.remove_member("admittedSet:1", "user:7").await, Ok(true));
        assert_eq!(store.is_member("admittedSet:1", "user:7").await, Ok(false));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_command() {
        let store = InMemoryQueueStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.pop_front("slotQueue:1").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert_eq!(store.pop_front("slotQueue:1").await, Ok(None));
    }
}
