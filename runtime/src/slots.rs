//! Per-item queue of inventory tickets.

use flashsale_core::error::StoreResult;
use flashsale_core::queue::{QueueName, QueueStore};
use flashsale_core::types::ItemId;
use std::sync::Arc;

const RETURNED_TICKET: &str = "returned";

/// FIFO of opaque tickets, one per unit of stock.
///
/// Holding a ticket is what admits a buyer. Claiming is a single atomic pop
/// in the queue store; the queue length is never compared against zero to
/// decide whether a claim may proceed.
#[derive(Clone)]
pub struct SlotQueue {
    queues: Arc<dyn QueueStore>,
}

impl SlotQueue {
    /// Slot queue over `queues`.
    #[must_use]
    pub fn new(queues: Arc<dyn QueueStore>) -> Self {
        Self { queues }
    }

    /// Fill the queue with `count` tickets, once per sale run.
    ///
    /// The marker check and the push are one atomic store operation, so
    /// concurrent callers push the tickets exactly once and a queue that has
    /// been drained is never refilled. Returns `true` for the caller that
    /// performed the push.
    ///
    /// # Errors
    ///
    /// Returns the queue store's error; no ticket is pushed in that case.
    pub async fn initialize(&self, item_id: ItemId, count: u32) -> StoreResult<bool> {
        let tickets = (1..=count).map(|n| n.to_string()).collect();
        let pushed = self
            .queues
            .initialize_once(
                &QueueName::SlotMarker.key(item_id),
                &QueueName::Slot.key(item_id),
                tickets,
            )
            .await?;
        if pushed {
            tracing::info!(item_id = %item_id, tickets = count, "Slot queue initialized");
        }
        Ok(pushed)
    }

    /// Take one ticket; `false` when none are left.
    ///
    /// # Errors
    ///
    /// Returns the queue store's error.
    pub async fn claim(&self, item_id: ItemId) -> StoreResult<bool> {
        Ok(self
            .queues
            .pop_front(&QueueName::Slot.key(item_id))
            .await?
            .is_some())
    }

    /// Put one ticket back, for a claim whose purchase could not be attempted.
    ///
    /// # Errors
    ///
    /// Returns the queue store's error.
    pub async fn release(&self, item_id: ItemId) -> StoreResult<()> {
        self.queues
            .push_back(&QueueName::Slot.key(item_id), RETURNED_TICKET)
            .await?;
        Ok(())
    }

    /// Tickets still unclaimed.
    ///
    /// Informational only; never use it to gate a claim.
    ///
    /// # Errors
    ///
    /// Returns the queue store's error.
    pub async fn remaining(&self, item_id: ItemId) -> StoreResult<u64> {
        self.queues.len(&QueueName::Slot.key(item_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashsale_testing::InMemoryQueueStore;
    use futures::future::join_all;

    fn slots() -> SlotQueue {
        SlotQueue::new(Arc::new(InMemoryQueueStore::new()))
    }

    #[tokio::test]
    async fn claims_until_empty() {
        let slots = slots();
        let item = ItemId::new(1000);
        assert_eq!(slots.initialize(item, 2).await, Ok(true));

        assert_eq!(slots.claim(item).await, Ok(true));
        assert_eq!(slots.claim(item).await, Ok(true));
        assert_eq!(slots.claim(item).await, Ok(false));
    }

    #[tokio::test]
    async fn drained_queue_is_not_refilled() {
        let slots = slots();
        let item = ItemId::new(1000);
        slots.initialize(item, 1).await.ok();
        slots.claim(item).await.ok();

        assert_eq!(slots.initialize(item, 1).await, Ok(false));
        assert_eq!(slots.remaining(item).await, Ok(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_initialization_pushes_once() {
        let slots = slots();
        let item = ItemId::new(1000);

        let winners = join_all((0..16).map(|_| {
            let slots = slots.clone();
            async move { slots.initialize(item, 5).await }
        }))
        .await
        .into_iter()
        .filter(|pushed| *pushed == Ok(true))
        .count();

        assert_eq!(winners, 1);
        assert_eq!(slots.remaining(item).await, Ok(5));
    }

    #[tokio::test]
    async fn released_ticket_can_be_claimed() {
        let slots = slots();
        let item = ItemId::new(1000);
        slots.initialize(item, 1).await.ok();
        slots.claim(item).await.ok();
        slots.release(item).await.ok();

        assert_eq!(slots.claim(item).await, Ok(true));
    }
}
