//! End-to-end admission scenarios against the in-memory stores.
//!
//! Run with: `cargo test -p flashsale-runtime --test admission_scenarios -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::Duration as ChronoDuration;
use flashsale_core::queue::{QueueName, QueueStore};
use flashsale_core::{AdmissionStatus, BuyerId, Exposure, Item, ItemId};
use flashsale_runtime::circuit_breaker::State;
use flashsale_runtime::{
    Backends, CircuitBreakerConfig, FlashSale, PipelineSettings, TokenIssuer, WorkerState,
};
use flashsale_testing::{
    InMemoryInventoryStore, InMemoryItemCache, InMemoryQueueStore, ManualClock, init_tracing,
    open_item, test_epoch,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "flash-sale-secret";

struct Sale {
    sale: Arc<FlashSale>,
    inventory: InMemoryInventoryStore,
    queues: InMemoryQueueStore,
    clock: ManualClock,
}

impl Sale {
    fn new(items: Vec<Item>) -> Self {
        init_tracing();
        let inventory = items
            .into_iter()
            .fold(InMemoryInventoryStore::new(), InMemoryInventoryStore::with_item);
        let queues = InMemoryQueueStore::new();
        let clock = ManualClock::new(test_epoch());
        let backends = Backends::new(
            Arc::new(inventory.clone()),
            Arc::new(queues.clone()),
            Arc::new(InMemoryItemCache::new()),
        )
        .with_clock(Arc::new(clock.clone()));
        let settings = PipelineSettings::builder()
            .poll_interval(Duration::from_millis(5))
            .drain_grace(Duration::from_millis(20))
            .shutdown_timeout(Duration::from_secs(5))
            .breaker(
                CircuitBreakerConfig::builder()
                    .failure_threshold(3)
                    .timeout(Duration::from_millis(50))
                    .success_threshold(1)
                    .build(),
            )
            .build();
        Self {
            sale: Arc::new(FlashSale::new(backends, TokenIssuer::new(SECRET), settings)),
            inventory,
            queues,
            clock,
        }
    }

    fn token(item: ItemId) -> String {
        TokenIssuer::new(SECRET).mint(item)
    }

    /// Every buyer submits once, all at the same time.
    async fn burst(
        &self,
        item: ItemId,
        buyers: impl IntoIterator<Item = i64>,
    ) -> Vec<AdmissionStatus> {
        let token = Self::token(item);
        let handles = buyers.into_iter().map(|buyer| {
            let sale = Arc::clone(&self.sale);
            let token = token.clone();
            tokio::spawn(async move { sale.execute(item, BuyerId::new(buyer), Some(&token)).await })
        });
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("buyer task panicked").status)
            .collect()
    }
}

impl Sale {
    /// Wait until the worker has published `len` results for `item`.
    async fn results_reach(&self, item: ItemId, len: usize) -> Vec<String> {
        let key = QueueName::Results.key(item);
        for _ in 0..200 {
            let results = self.queues.list_snapshot(&key);
            if results.len() >= len {
                return results;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.queues.list_snapshot(&key)
    }
}

fn count(statuses: &[AdmissionStatus], wanted: AdmissionStatus) -> usize {
    statuses.iter().filter(|status| **status == wanted).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_units_five_buyers() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 3, test_epoch())]);

    let statuses = sale.burst(item, 1..=5).await;

    assert_eq!(count(&statuses, AdmissionStatus::Success), 3);
    assert_eq!(count(&statuses, AdmissionStatus::Closed), 2);

    assert_eq!(sale.sale.wait_until_drained(item).await, Some(WorkerState::Stopped));
    assert_eq!(sale.inventory.stock(item).await, Some(0));
    assert_eq!(sale.inventory.purchase_count(item).await, 3);

    let mut polled = Vec::new();
    for buyer in 1..=5 {
        polled.push(sale.sale.poll(item, BuyerId::new(buyer)).await.unwrap());
    }
    assert_eq!(polled.iter().filter(|s| **s == Some(AdmissionStatus::Success)).count(), 3);
    assert_eq!(polled.iter().filter(|s| s.is_none()).count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeat_buyer_gets_one_record() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 5, test_epoch())]);
    let token = Sale::token(item);
    let buyer = BuyerId::new(13_800_000_000);

    let first = sale.sale.execute(item, buyer, Some(&token)).await;
    let second = sale.sale.execute(item, buyer, Some(&token)).await;
    sale.sale.shutdown().await;
    let third = sale.sale.execute(item, buyer, Some(&token)).await;

    assert_eq!(first.status, AdmissionStatus::Success);
    assert_eq!(second.status, AdmissionStatus::Repeated);
    assert_eq!(third.status, AdmissionStatus::Repeated);
    assert_eq!(sale.inventory.purchase_count(item).await, 1);
    assert_eq!(sale.inventory.stock(item).await, Some(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_admit_once() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 5, test_epoch())]);

    let statuses = sale.burst(item, std::iter::repeat_n(42, 20)).await;

    assert_eq!(count(&statuses, AdmissionStatus::Success), 1);
    assert_eq!(count(&statuses, AdmissionStatus::Repeated), 19);
    sale.sale.shutdown().await;
    assert_eq!(sale.inventory.purchase_count(item).await, 1);
}

#[tokio::test]
async fn closed_sale_stays_closed() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 1, test_epoch())]);
    let token = Sale::token(item);

    assert_eq!(
        sale.sale.execute(item, BuyerId::new(1), Some(&token)).await.status,
        AdmissionStatus::Success
    );
    for _ in 0..5 {
        let execution = sale.sale.execute(item, BuyerId::new(2), Some(&token)).await;
        assert_eq!(execution.status, AdmissionStatus::Closed);
    }

    sale.clock.advance(ChronoDuration::hours(2));
    let late = sale.sale.execute(item, BuyerId::new(3), Some(&token)).await;
    assert_eq!(late.status, AdmissionStatus::Closed);
}

#[tokio::test]
async fn forged_tokens_are_data_rewrite() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 3, test_epoch())]);
    let genuine = Sale::token(item);
    let other_item = Sale::token(ItemId::new(1001));
    let other_secret = TokenIssuer::new("guess").mint(item);

    let forgeries = [
        None,
        Some(""),
        Some("0000"),
        Some(other_item.as_str()),
        Some(other_secret.as_str()),
    ];
    for forged in forgeries {
        let execution = sale.sale.execute(item, BuyerId::new(1), forged).await;
        assert_eq!(execution.status, AdmissionStatus::DataRewrite);
    }
    assert_eq!(sale.queues.command_count(), 0);

    let genuine = sale.sale.execute(item, BuyerId::new(1), Some(&genuine)).await;
    assert_eq!(genuine.status, AdmissionStatus::Success);
    sale.sale.shutdown().await;
}

#[tokio::test]
async fn exposure_window_is_inclusive() {
    let item = open_item(1000, 3, test_epoch());
    let (start, end) = (item.start_time, item.end_time);
    let sale = Sale::new(vec![item]);
    let id = ItemId::new(1000);
    let one_ms = ChronoDuration::milliseconds(1);

    let mut exposed = Vec::new();
    for at in [start - one_ms, start, end, end + one_ms] {
        sale.clock.set(at);
        exposed.push(sale.sale.expose(id).await.unwrap().is_exposed());
    }

    assert_eq!(exposed, vec![false, true, true, false]);
    sale.clock.set(start - one_ms);
    assert!(matches!(
        sale.sale.expose(id).await,
        Ok(Exposure::Closed { now, .. }) if now == start - one_ms
    ));
}

#[tokio::test]
async fn worker_drains_every_admission() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 8, test_epoch())]);

    let statuses = sale.burst(item, 1..=8).await;
    assert_eq!(count(&statuses, AdmissionStatus::Success), 8);

    assert_eq!(sale.sale.wait_until_drained(item).await, Some(WorkerState::Stopped));
    let results = sale.queues.list_snapshot(&QueueName::Results.key(item));
    let failures = sale.queues.list_snapshot(&QueueName::Failure.key(item));
    assert_eq!(results.len() + failures.len(), 8);
    assert_eq!(sale.queues.len(&QueueName::Wait.key(item)).await, Ok(0));
    assert!(sale.sale.active_items().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_first_submissions_activate_once() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 10, test_epoch())]);

    let statuses = sale.burst(item, 1..=50).await;

    assert_eq!(count(&statuses, AdmissionStatus::Success), 10);
    assert_eq!(count(&statuses, AdmissionStatus::Closed), 40);
    assert_eq!(sale.sale.wait_until_drained(item).await, Some(WorkerState::Stopped));
    assert_eq!(sale.inventory.purchase_count(item).await, 10);
    assert_eq!(sale.inventory.stock(item).await, Some(0));
    assert_eq!(sale.queues.exists(&QueueName::SlotMarker.key(item)).await, Ok(true));
}

#[tokio::test]
async fn queue_outage_falls_back_to_transactions() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 3, test_epoch())]);
    let token = Sale::token(item);
    sale.queues.set_unavailable(true);

    let mut executions = Vec::new();
    for buyer in 1..=5 {
        executions.push(sale.sale.execute(item, BuyerId::new(buyer), Some(&token)).await);
    }
    let repeat = sale.sale.execute(item, BuyerId::new(1), Some(&token)).await;

    let statuses: Vec<_> = executions.iter().map(|execution| execution.status).collect();
    assert_eq!(count(&statuses, AdmissionStatus::Success), 3);
    assert_eq!(count(&statuses, AdmissionStatus::Closed), 2);
    assert!(executions[..3].iter().all(|execution| execution.record.is_some()));
    assert_eq!(repeat.status, AdmissionStatus::Repeated);
    assert_eq!(sale.sale.queue_path_state(), State::Open);
    assert_eq!(sale.inventory.stock(item).await, Some(0));
    assert_eq!(
        sale.sale.poll(item, BuyerId::new(2)).await,
        Ok(Some(AdmissionStatus::Success))
    );
}

#[tokio::test]
async fn queue_path_recovers_after_outage() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 10, test_epoch())]);
    let token = Sale::token(item);

    sale.queues.set_unavailable(true);
    for buyer in 1..=3 {
        sale.sale.execute(item, BuyerId::new(buyer), Some(&token)).await;
    }
    assert_eq!(sale.sale.queue_path_state(), State::Open);

    sale.queues.set_unavailable(false);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let execution = sale.sale.execute(item, BuyerId::new(4), Some(&token)).await;

    assert_eq!(execution.status, AdmissionStatus::Success);
    assert_eq!(execution.record, None);
    assert_eq!(sale.sale.queue_path_state(), State::Closed);

    // The queue path only learns about fallback purchases from the worker,
    // so the resubmission is accepted before it is persisted.
    let repeat = sale.sale.execute(item, BuyerId::new(1), Some(&token)).await;
    assert_eq!(repeat.status, AdmissionStatus::Success);

    assert_eq!(
        sale.results_reach(item, 2).await,
        vec!["user:4".to_string(), "user:1".to_string()]
    );
    assert_eq!(sale.inventory.purchase_count(item).await, 4);
    assert_eq!(sale.inventory.stock(item).await, Some(6));
    assert_eq!(sale.queues.len(&QueueName::Slot.key(item)).await, Ok(6));
    let again = sale.sale.execute(item, BuyerId::new(1), Some(&token)).await;
    assert_eq!(again.status, AdmissionStatus::Repeated);
    sale.sale.shutdown().await;
}

#[tokio::test]
async fn fallback_buyer_resubmitting_does_not_strand_stock() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 3, test_epoch())]);
    let token = Sale::token(item);

    sale.queues.set_unavailable(true);
    let fallback = sale.sale.execute(item, BuyerId::new(1), Some(&token)).await;
    assert_eq!(fallback.status, AdmissionStatus::Success);

    sale.queues.set_unavailable(false);
    let resubmit = sale.sale.execute(item, BuyerId::new(1), Some(&token)).await;
    assert_eq!(resubmit.status, AdmissionStatus::Success);
    assert_eq!(sale.results_reach(item, 1).await, vec!["user:1".to_string()]);

    let second = sale.sale.execute(item, BuyerId::new(2), Some(&token)).await;
    let third = sale.sale.execute(item, BuyerId::new(3), Some(&token)).await;
    assert_eq!(second.status, AdmissionStatus::Success);
    assert_eq!(third.status, AdmissionStatus::Success);

    assert_eq!(sale.sale.wait_until_drained(item).await, Some(WorkerState::Stopped));
    assert_eq!(sale.inventory.stock(item).await, Some(0));
    assert_eq!(sale.inventory.purchase_count(item).await, 3);
    assert_eq!(
        sale.sale.poll(item, BuyerId::new(3)).await,
        Ok(Some(AdmissionStatus::Success))
    );
}

#[tokio::test]
async fn inner_error_is_reported_and_ticket_returned() {
    let item = ItemId::new(1000);
    let sale = Sale::new(vec![open_item(1000, 1, test_epoch())]);
    let token = Sale::token(item);
    sale.inventory.fail_next_decrements(1);

    let first = sale.sale.execute(item, BuyerId::new(1), Some(&token)).await;
    assert_eq!(first.status, AdmissionStatus::Success);

    let mut polled = None;
    for _ in 0..100 {
        polled = sale.sale.poll(item, BuyerId::new(1)).await.unwrap();
        if polled != Some(AdmissionStatus::Pending) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(polled, Some(AdmissionStatus::InnerError));

    let retry = sale.sale.execute(item, BuyerId::new(1), Some(&token)).await;
    assert_eq!(retry.status, AdmissionStatus::Success);
    assert_eq!(sale.sale.wait_until_drained(item).await, Some(WorkerState::Stopped));
    assert_eq!(sale.inventory.purchase_count(item).await, 1);
    assert_eq!(sale.inventory.stock(item).await, Some(0));
}
