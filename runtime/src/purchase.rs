//! The durable purchase unit shared by the worker and the fallback.
//!
//! One transaction, two writes, in this order:
//!
//! 1. insert the purchase record, conditioned on `(item, buyer)` uniqueness;
//! 2. decrement stock, conditioned on `remaining_stock > 0` and the sale window.
//!
//! A duplicate buyer is turned away by step 1 before step 2 takes the item's
//! row lock, which every buyer of the item contends for. If step 2 is a no-op
//! the insert is rolled back with it, so a record never exists without its
//! decrement.

use chrono::{DateTime, Utc};
use flashsale_core::error::{StoreError, StoreResult};
use flashsale_core::store::{InventoryStore, InventoryTransaction};
use flashsale_core::types::{BuyerId, ItemId, PurchaseRecord};

/// Result of one purchase transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Both writes committed
    Recorded(PurchaseRecord),
    /// The buyer already has a purchase for this item; nothing changed
    Duplicate,
    /// No stock left or `at` is outside the window; nothing changed
    SoldOut,
}

/// Run the insert-then-decrement transaction for `buyer_id`.
///
/// `at` is the purchase time written to the record and checked against the
/// sale window.
///
/// # Errors
///
/// Returns the store's error. The transaction is rolled back and neither
/// write is applied.
pub async fn commit_purchase(
    inventory: &dyn InventoryStore,
    item_id: ItemId,
    buyer_id: BuyerId,
    at: DateTime<Utc>,
) -> StoreResult<PurchaseOutcome> {
    let mut tx = inventory.begin().await?;

    if tx.insert_purchase(item_id, buyer_id, at).await? == 0 {
        abandon(tx, item_id).await;
        return Ok(PurchaseOutcome::Duplicate);
    }

    if tx.decrement_stock(item_id, at).await? == 0 {
        abandon(tx, item_id).await;
        return Ok(PurchaseOutcome::SoldOut);
    }

    let record = tx.find_purchase(item_id, buyer_id).await?.ok_or_else(|| {
        StoreError::Database(format!(
            "purchase of buyer {buyer_id} for item {item_id} not visible after insert"
        ))
    })?;

    tx.commit().await?;
    Ok(PurchaseOutcome::Recorded(record))
}

/// Roll back a transaction whose outcome is already decided.
async fn abandon(tx: Box<dyn InventoryTransaction>, item_id: ItemId) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(item_id = %item_id, error = %err, "Rollback failed");
    }
}
