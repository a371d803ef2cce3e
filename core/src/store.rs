//! Durable inventory store abstraction.
//!
//! The durable store owns the authoritative remaining stock of every item and
//! the purchase table, unique on `(item, buyer)`. That uniqueness constraint is
//! the final arbiter of at-most-once purchase; the queue layer in front of it
//! is only an admission-rate buffer.
//!
//! # Implementations
//!
//! - `PostgresInventoryStore` (in `flashsale-postgres`): production store
//! - `InMemoryInventoryStore` (in `flashsale-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! store can be shared as `Arc<dyn InventoryStore>` between request handlers
//! and background workers.

use crate::error::StoreResult;
use crate::types::{BuyerId, Item, ItemId, PurchaseRecord};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future returned by store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read access to items and purchases, plus transactional writes.
pub trait InventoryStore: Send + Sync {
    /// Load one item.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    fn find_item(&self, item_id: ItemId) -> BoxFuture<'_, StoreResult<Option<Item>>>;

    /// Page through items ordered by creation time, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    fn list_items(&self, offset: u32, limit: u32) -> BoxFuture<'_, StoreResult<Vec<Item>>>;

    /// Load the purchase of `buyer_id` for `item_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    fn find_purchase(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> BoxFuture<'_, StoreResult<Option<PurchaseRecord>>>;

    /// Open a transaction for a purchase.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` or `StoreError::Unavailable` if no
    /// transaction can be started.
    fn begin(&self) -> BoxFuture<'_, StoreResult<Box<dyn InventoryTransaction>>>;
}

/// One durable transaction.
///
/// Both writes report affected-row counts so callers can tell "applied" from
/// "no-op". Dropping a transaction without calling [`commit`] rolls it back.
///
/// [`commit`]: InventoryTransaction::commit
pub trait InventoryTransaction: Send {
    /// Insert a purchase record.
    ///
    /// Returns `0` when `(item_id, buyer_id)` already exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` for any failure other than the
    /// uniqueness conflict.
    fn insert_purchase(
        &mut self,
        item_id: ItemId,
        buyer_id: BuyerId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<u64>>;

    /// Take one unit of stock.
    ///
    /// Conditioned on `remaining_stock > 0` and on `at` lying inside the sale
    /// window. Returns `0` when either condition fails. This statement holds
    /// the item's row lock until the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the statement fails.
    fn decrement_stock(&mut self, item_id: ItemId, at: DateTime<Utc>)
    -> BoxFuture<'_, StoreResult<u64>>;

    /// Read a purchase inside this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    fn find_purchase(
        &mut self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> BoxFuture<'_, StoreResult<Option<PurchaseRecord>>>;

    /// Make both writes durable.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the commit fails; nothing is applied.
    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>>;

    /// Discard both writes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the rollback statement fails.
    fn rollback(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>>;
}
