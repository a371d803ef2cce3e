//! In-memory durable inventory store for testing.

use chrono::{DateTime, Utc};
use flashsale_core::error::{StoreError, StoreResult};
use flashsale_core::store::{BoxFuture, InventoryStore, InventoryTransaction};
use flashsale_core::types::{BuyerId, Item, ItemId, PurchaseRecord};
use std::collections::{BTreeMap, HashMap};
use std::future::ready;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct InventoryState {
    items: BTreeMap<ItemId, Item>,
    purchases: HashMap<(ItemId, BuyerId), PurchaseRecord>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    failing_decrements: AtomicU32,
    failing_commits: AtomicU32,
}

#[derive(Debug, Default)]
struct Stats {
    transactions: AtomicU64,
    decrement_statements: AtomicU64,
    commits: AtomicU64,
}

/// In-memory inventory store for testing.
///
/// A transaction holds the store-wide lock from `begin` until commit or
/// rollback, which serializes purchases the way the item row lock does in
/// Postgres. Uncommitted writes are undone when the transaction is dropped.
///
/// Faults can be injected to exercise rollback:
/// - [`fail_next_decrements`](Self::fail_next_decrements): the decrement
///   statement errors after the insert succeeded
/// - [`fail_next_commits`](Self::fail_next_commits): commit errors, nothing applied
/// - [`set_unavailable`](Self::set_unavailable): every call errors
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<InventoryState>>,
    faults: Arc<Faults>,
    stats: Arc<Stats>,
}

impl InMemoryInventoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an item before the store is shared.
    #[must_use]
    pub fn with_item(self, item: Item) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.items.insert(item.id, item);
        }
        self
    }

    /// Insert or replace an item.
    pub async fn put_item(&self, item: Item) {
        self.state.lock().await.items.insert(item.id, item);
    }

    /// Current authoritative stock of an item.
    pub async fn stock(&self, item_id: ItemId) -> Option<u32> {
        self.state
            .lock()
            .await
            .items
            .get(&item_id)
            .map(|item| item.remaining_stock)
    }

    /// Number of purchase records for an item.
    pub async fn purchase_count(&self, item_id: ItemId) -> usize {
        self.state
            .lock()
            .await
            .purchases
            .keys()
            .filter(|(id, _)| *id == item_id)
            .count()
    }

    /// Make the next `count` decrement statements fail.
    pub fn fail_next_decrements(&self, count: u32) {
        self.faults.failing_decrements.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail.
    pub fn fail_next_commits(&self, count: u32) {
        self.faults.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of transactions opened.
    #[must_use]
    pub fn transaction_count(&self) -> u64 {
        self.stats.transactions.load(Ordering::SeqCst)
    }

    /// Number of decrement statements executed (the hot row lock).
    #[must_use]
    pub fn decrement_count(&self) -> u64 {
        self.stats.decrement_statements.load(Ordering::SeqCst)
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.stats.commits.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("inventory store offline".to_string()));
        }
        Ok(())
    }
}

/// Take one pending fault from `counter`.
fn consume_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InventoryStore for InMemoryInventoryStore {
    fn find_item(&self, item_id: ItemId) -> BoxFuture<'_, StoreResult<Option<Item>>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.state.lock().await.items.get(&item_id).cloned())
        })
    }

    fn list_items(&self, offset: u32, limit: u32) -> BoxFuture<'_, StoreResult<Vec<Item>>> {
        Box::pin(async move {
            self.check_available()?;
            let state = self.state.lock().await;
            let mut items: Vec<Item> = state.items.values().cloned().collect();
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
            Ok(items
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        })
    }

    fn find_purchase(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> BoxFuture<'_, StoreResult<Option<PurchaseRecord>>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .state
                .lock()
                .await
                .purchases
                .get(&(item_id, buyer_id))
                .cloned())
        })
    }

    fn begin(&self) -> BoxFuture<'_, StoreResult<Box<dyn InventoryTransaction>>> {
        Box::pin(async move {
            self.check_available()?;
            let guard = Arc::clone(&self.state).lock_owned().await;
            self.stats.transactions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(InMemoryTransaction {
                guard,
                undo: Vec::new(),
                committed: false,
                faults: Arc::clone(&self.faults),
                stats: Arc::clone(&self.stats),
            }) as Box<dyn InventoryTransaction>)
        })
    }
}

#[derive(Debug)]
enum Undo {
    RemovePurchase(ItemId, BuyerId),
    RestoreStock(ItemId),
}

/// Transaction over [`InMemoryInventoryStore`].
#[derive(Debug)]
struct InMemoryTransaction {
    guard: OwnedMutexGuard<InventoryState>,
    undo: Vec<Undo>,
    committed: bool,
    faults: Arc<Faults>,
    stats: Arc<Stats>,
}

impl InMemoryTransaction {
    fn revert(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::RemovePurchase(item_id, buyer_id) => {
                    self.guard.purchases.remove(&(item_id, buyer_id));
                }
                Undo::RestoreStock(item_id) => {
                    if let Some(item) = self.guard.items.get_mut(&item_id) {
                        item.remaining_stock += 1;
                    }
                }
            }
        }
    }
}

impl InventoryTransaction for InMemoryTransaction {
    fn insert_purchase(
        &mut self,
        item_id: ItemId,
        buyer_id: BuyerId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        let key = (item_id, buyer_id);
        let affected = if self.guard.purchases.contains_key(&key) {
            0
        } else {
            self.guard.purchases.insert(
                key,
                PurchaseRecord {
                    item_id,
                    buyer_id,
                    purchased_at: at,
                },
            );
            self.undo.push(Undo::RemovePurchase(item_id, buyer_id));
            1
        };
        Box::pin(ready(Ok(affected)))
    }

    fn decrement_stock(
        &mut self,
        item_id: ItemId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        self.stats.decrement_statements.fetch_add(1, Ordering::SeqCst);
        if consume_fault(&self.faults.failing_decrements) {
            return Box::pin(ready(Err(StoreError::Database(
                "injected decrement failure".to_string(),
            ))));
        }
        let affected = match self.guard.items.get_mut(&item_id) {
            Some(item) if item.in_window(at) && item.remaining_stock > 0 => {
                item.remaining_stock -= 1;
                self.undo.push(Undo::RestoreStock(item_id));
                1
            }
            _ => 0,
        };
        Box::pin(ready(Ok(affected)))
    }

    fn find_purchase(
        &mut self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> BoxFuture<'_, StoreResult<Option<PurchaseRecord>>> {
        let record = self.guard.purchases.get(&(item_id, buyer_id)).cloned();
        Box::pin(ready(Ok(record)))
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        let mut this = self;
        if consume_fault(&this.faults.failing_commits) {
            // Dropping `this` reverts the pending writes.
            return Box::pin(ready(Err(StoreError::Database(
                "injected commit failure".to_string(),
            ))));
        }
        this.committed = true;
        this.undo.clear();
        this.stats.commits.fetch_add(1, Ordering::SeqCst);
        Box::pin(ready(Ok(())))
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        drop(self);
        Box::pin(ready(Ok(())))
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.committed {
            self.revert();
        }
    }
}
