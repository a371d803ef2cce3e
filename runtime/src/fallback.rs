//! Direct-to-store admission used when the queue layer is unavailable.

use crate::purchase::{PurchaseOutcome, commit_purchase};
use flashsale_core::environment::Clock;
use flashsale_core::status::{AdmissionStatus, Execution};
use flashsale_core::store::InventoryStore;
use flashsale_core::types::{BuyerId, ItemId};
use std::sync::Arc;

/// Admits a buyer with one synchronous durable transaction.
///
/// Token verification happens before this path is chosen. The answer is final:
/// unlike the queue path there is nothing left to poll.
#[derive(Clone)]
pub struct TransactionalFallback {
    inventory: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
}

impl TransactionalFallback {
    /// Fallback over `inventory`, stamping purchases with `clock`.
    #[must_use]
    pub fn new(inventory: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { inventory, clock }
    }

    /// Purchase one unit for `buyer_id`.
    ///
    /// Store failures are logged and reported as `InnerError`; the
    /// transaction is rolled back and never partially applied.
    pub async fn execute(&self, item_id: ItemId, buyer_id: BuyerId) -> Execution {
        let now = self.clock.now();
        let outcome = commit_purchase(self.inventory.as_ref(), item_id, buyer_id, now).await;
        let execution = match outcome {
            Ok(PurchaseOutcome::Recorded(record)) => Execution::recorded(record),
            Ok(PurchaseOutcome::Duplicate) => Execution::new(item_id, AdmissionStatus::Repeated),
            Ok(PurchaseOutcome::SoldOut) => Execution::new(item_id, AdmissionStatus::Closed),
            Err(err) => {
                tracing::error!(
                    item_id = %item_id,
                    buyer_id = %buyer_id,
                    error = %err,
                    "Transactional purchase failed"
                );
                Execution::new(item_id, AdmissionStatus::InnerError)
            }
        };

        tracing::debug!(
            item_id = %item_id,
            buyer_id = %buyer_id,
            status = execution.status.as_str(),
            "Fallback admission"
        );
        metrics::counter!("flashsale.fallback.executions", "status" => execution.status.as_str())
            .increment(1);
        execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashsale_core::types::PurchaseRecord;
    use flashsale_testing::{FixedClock, InMemoryInventoryStore, open_item, test_epoch};

    const ITEM: ItemId = ItemId::new(1000);

    fn fallback(stock: u32) -> (TransactionalFallback, InMemoryInventoryStore) {
        let store = InMemoryInventoryStore::new().with_item(open_item(1000, stock, test_epoch()));
        let fallback = TransactionalFallback::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(test_epoch())),
        );
        (fallback, store)
    }

    #[tokio::test]
    async fn success_carries_record() {
        let (fallback, _) = fallback(1);
        let execution = fallback.execute(ITEM, BuyerId::new(7)).await;

        assert_eq!(execution.status, AdmissionStatus::Success);
        assert_eq!(
            execution.record,
            Some(PurchaseRecord {
                item_id: ITEM,
                buyer_id: BuyerId::new(7),
                purchased_at: test_epoch(),
            })
        );
    }

    #[tokio::test]
    async fn second_purchase_is_repeated() {
        let (fallback, store) = fallback(5);
        fallback.execute(ITEM, BuyerId::new(7)).await;
        let execution = fallback.execute(ITEM, BuyerId::new(7)).await;

        assert_eq!(execution, Execution::new(ITEM, AdmissionStatus::Repeated));
        assert_eq!(store.stock(ITEM).await, Some(4));
        assert_eq!(store.purchase_count(ITEM).await, 1);
    }

    #[tokio::test]
    async fn exhausted_stock_is_closed() {
        let (fallback, store) = fallback(1);
        fallback.execute(ITEM, BuyerId::new(7)).await;
        let execution = fallback.execute(ITEM, BuyerId::new(8)).await;

        assert_eq!(execution.status, AdmissionStatus::Closed);
        assert_eq!(store.purchase_count(ITEM).await, 1);
        assert_eq!(store.stock(ITEM).await, Some(0));
    }

    #[tokio::test]
    async fn store_failure_is_inner_error_and_rolled_back() {
        let (fallback, store) = fallback(3);
        store.fail_next_decrements(1);

        let execution = fallback.execute(ITEM, BuyerId::new(7)).await;

        assert_eq!(execution.status, AdmissionStatus::InnerError);
        assert_eq!(store.purchase_count(ITEM).await, 0);
        assert_eq!(store.stock(ITEM).await, Some(3));
        assert_eq!((store.transaction_count(), store.commit_count()), (1, 0));
    }
}
