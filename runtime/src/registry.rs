//! Supervisor for admission workers.
//!
//! At most one worker is ever started per item and process. The registry
//! keeps each worker's item snapshot, its observable [`WorkerState`] and its
//! join handle, and stops all of them together on shutdown.

use crate::worker::{AdmissionWorker, WorkerReport, WorkerState};
use flashsale_core::error::AdmissionError;
use flashsale_core::types::{Item, ItemId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

struct WorkerEntry {
    item: Item,
    state: watch::Receiver<WorkerState>,
    handle: Option<JoinHandle<WorkerReport>>,
}

/// How a worker ended during [`WorkerRegistry::shutdown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker returned its report
    Finished(WorkerReport),
    /// The worker task panicked or was cancelled
    Failed,
    /// The worker did not stop within the timeout and was aborted
    TimedOut,
}

/// Registry of per-item admission workers.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<ItemId, WorkerEntry>>,
    shutdown: watch::Sender<bool>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("items", &self.lock().len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl WorkerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            workers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Spawn `worker` unless its item already has one.
    ///
    /// Returns `true` if this call started the worker. Once a worker has been
    /// started for an item, later calls are no-ops even after it stopped: a
    /// sale run is served by one worker only.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// was called.
    pub fn start(&self, worker: AdmissionWorker) -> Result<bool, AdmissionError> {
        let mut workers = self.lock();
        if self.is_shutting_down() {
            return Err(AdmissionError::ShuttingDown);
        }
        let item = worker.item().clone();
        if workers.contains_key(&item.id) {
            return Ok(false);
        }

        let (state_tx, state_rx) = watch::channel(WorkerState::Running);
        let span = tracing::info_span!("admission_worker", item_id = %item.id);
        let handle = tokio::spawn(worker.run(state_tx, self.shutdown.subscribe()).instrument(span));
        metrics::counter!("flashsale.worker.started").increment(1);

        workers.insert(
            item.id,
            WorkerEntry {
                item,
                state: state_rx,
                handle: Some(handle),
            },
        );
        Ok(true)
    }

    /// Item snapshot taken when the item's worker was started.
    #[must_use]
    pub fn item(&self, item_id: ItemId) -> Option<Item> {
        self.lock().get(&item_id).map(|entry| entry.item.clone())
    }

    /// Current state of the item's worker, if one was ever started.
    #[must_use]
    pub fn state(&self, item_id: ItemId) -> Option<WorkerState> {
        self.lock().get(&item_id).map(|entry| *entry.state.borrow())
    }

    /// Items whose worker has not stopped yet, in id order.
    #[must_use]
    pub fn active_items(&self) -> Vec<ItemId> {
        let mut items: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, entry)| *entry.state.borrow() != WorkerState::Stopped)
            .map(|(item_id, _)| *item_id)
            .collect();
        items.sort_unstable();
        items
    }

    /// Wait until the item's worker reaches `target` or stops.
    ///
    /// Returns the state observed last; `None` if no worker was started.
    pub async fn wait_for(&self, item_id: ItemId, target: WorkerState) -> Option<WorkerState> {
        let mut state = self.lock().get(&item_id).map(|entry| entry.state.clone())?;
        let reached = state
            .wait_for(|current| *current == target || *current == WorkerState::Stopped)
            .await
            .map(|current| *current);
        Some(reached.unwrap_or_else(|_| *state.borrow()))
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Signal every worker to drain and stop, then wait for them.
    ///
    /// Each worker gets `timeout` to finish; a worker that does not is
    /// aborted. Calling this twice returns an empty list the second time.
    pub async fn shutdown(&self, timeout: Duration) -> Vec<(ItemId, WorkerExit)> {
        self.shutdown.send_replace(true);
        let handles: Vec<_> = {
            let mut workers = self.lock();
            workers
                .iter_mut()
                .filter_map(|(item_id, entry)| entry.handle.take().map(|handle| (*item_id, handle)))
                .collect()
        };
        tracing::info!(workers = handles.len(), "Shutting down admission workers");

        let mut exits = Vec::with_capacity(handles.len());
        for (item_id, mut handle) in handles {
            let exit = match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(report)) => {
                    tracing::info!(
                        item_id = %item_id,
                        processed = report.processed,
                        "Worker stopped gracefully"
                    );
                    WorkerExit::Finished(report)
                }
                Ok(Err(err)) => {
                    tracing::warn!(item_id = %item_id, error = %err, "Worker task failed");
                    WorkerExit::Failed
                }
                Err(_) => {
                    tracing::warn!(item_id = %item_id, "Worker shutdown timed out");
                    handle.abort();
                    WorkerExit::TimedOut
                }
            };
            exits.push((item_id, exit));
        }
        exits
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemId, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PipelineSettings;
    use flashsale_core::queue::{QueueName, QueueStore};
    use flashsale_testing::{
        FixedClock, InMemoryInventoryStore, InMemoryQueueStore, open_item, test_epoch,
    };
    use std::sync::Arc;

    fn worker(queues: &InMemoryQueueStore, id: i64) -> AdmissionWorker {
        let item = open_item(id, 1, test_epoch());
        AdmissionWorker::new(
            item.clone(),
            Arc::new(queues.clone()),
            Arc::new(InMemoryInventoryStore::new().with_item(item)),
            Arc::new(FixedClock::new(test_epoch())),
            PipelineSettings::builder()
                .poll_interval(Duration::from_millis(5))
                .build(),
        )
    }

    async fn keep_alive(queues: &InMemoryQueueStore, id: i64) {
        let item = ItemId::new(id);
        queues
            .initialize_once(
                &QueueName::SlotMarker.key(item),
                &QueueName::Slot.key(item),
                vec!["1".to_string()],
            )
            .await
            .ok();
    }

    #[tokio::test]
    async fn starts_each_item_once() {
        let queues = InMemoryQueueStore::new();
        keep_alive(&queues, 1000).await;
        let registry = WorkerRegistry::new();

        assert_eq!(registry.start(worker(&queues, 1000)), Ok(true));
        assert_eq!(registry.start(worker(&queues, 1000)), Ok(false));
        assert_eq!(registry.active_items(), vec![ItemId::new(1000)]);
        assert_eq!(registry.state(ItemId::new(1000)), Some(WorkerState::Running));

        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn stopped_worker_is_not_restarted() {
        let queues = InMemoryQueueStore::new();
        let registry = WorkerRegistry::new();
        let item = ItemId::new(1000);

        registry.start(worker(&queues, 1000)).ok();
        assert_eq!(registry.wait_for(item, WorkerState::Stopped).await, Some(WorkerState::Stopped));

        assert_eq!(registry.start(worker(&queues, 1000)), Ok(false));
        assert!(registry.active_items().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_all_workers_and_refuses_new_ones() {
        let queues = InMemoryQueueStore::new();
        keep_alive(&queues, 1000).await;
        keep_alive(&queues, 1001).await;
        let registry = WorkerRegistry::new();
        registry.start(worker(&queues, 1000)).ok();
        registry.start(worker(&queues, 1001)).ok();

        let exits = registry.shutdown(Duration::from_secs(1)).await;

        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|(_, exit)| matches!(exit, WorkerExit::Finished(_))));
        assert!(registry.active_items().is_empty());
        assert_eq!(registry.start(worker(&queues, 1002)), Err(AdmissionError::ShuttingDown));
        assert!(registry.shutdown(Duration::from_secs(1)).await.is_empty());
    }

    #[test]
    fn unknown_item_has_no_state() {
        let registry = WorkerRegistry::new();
        assert_eq!(registry.state(ItemId::new(1)), None);
        assert_eq!(registry.item(ItemId::new(1)), None);
    }
}
