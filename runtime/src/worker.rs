//! Background worker that persists admitted buyers for one item.
//!
//! The worker is the only consumer of the item's wait queue and the only
//! writer of its results and failure queues. It moves through
//! `Running -> Draining -> Stopped`:
//!
//! - **Running**: pop one wait-queue entry at a time and run the purchase
//!   transaction for it. When the wait queue is empty, stop if the sale has
//!   ended or no tickets are left, otherwise sleep for the poll interval.
//! - **Draining**: wait one grace period for admissions that claimed a ticket
//!   but had not yet reached the wait queue, then persist whatever is there.
//!   Tickets are no longer returned: nothing would serve a buyer who claimed
//!   one after the worker stops.
//! - **Stopped**: the task has returned its [`WorkerReport`].
//!
//! Entries that arrive after the drain are not served. They hold a ticket
//! that was claimed in good faith, so the stock invariant is unaffected.

use crate::purchase::{PurchaseOutcome, commit_purchase};
use crate::retry::retry_with_backoff;
use crate::settings::PipelineSettings;
use crate::slots::SlotQueue;
use flashsale_core::environment::Clock;
use flashsale_core::error::StoreResult;
use flashsale_core::queue::{FailureEntry, QueueName, QueueStore, WaitEntry, buyer_entry};
use flashsale_core::status::AdmissionStatus;
use flashsale_core::store::InventoryStore;
use flashsale_core::types::{BuyerId, Item};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Lifecycle of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Polling the wait queue
    Running,
    /// Stop condition met; persisting the last entries
    Draining,
    /// Finished
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// Counts of what a worker did during its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Wait-queue entries persisted (any outcome)
    pub processed: u64,
    /// Purchases committed
    pub succeeded: u64,
    /// Buyers that already had a purchase
    pub repeated: u64,
    /// Buyers turned away by the stock or window condition
    pub closed: u64,
    /// Buyers whose purchase failed on a store error
    pub failed: u64,
    /// Wait-queue entries that could not be decoded
    pub malformed: u64,
    /// Outcomes that could not be written to the results or failure queue
    pub unrecorded: u64,
}

impl WorkerReport {
    fn count(&mut self, status: AdmissionStatus) {
        self.processed += 1;
        match status {
            AdmissionStatus::Success => self.succeeded += 1,
            AdmissionStatus::Repeated => self.repeated += 1,
            AdmissionStatus::Closed => self.closed += 1,
            AdmissionStatus::InnerError
            | AdmissionStatus::DataRewrite
            | AdmissionStatus::Pending => self.failed += 1,
        }
    }
}

/// Persists admissions for a single item.
#[derive(Clone)]
pub struct AdmissionWorker {
    item: Item,
    queues: Arc<dyn QueueStore>,
    inventory: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    slots: SlotQueue,
    settings: PipelineSettings,
}

impl AdmissionWorker {
    /// Worker for `item`, using the snapshot's end time as its deadline.
    #[must_use]
    pub fn new(
        item: Item,
        queues: Arc<dyn QueueStore>,
        inventory: Arc<dyn InventoryStore>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            item,
            slots: SlotQueue::new(Arc::clone(&queues)),
            queues,
            inventory,
            clock,
            settings,
        }
    }

    /// Item this worker serves.
    #[must_use]
    pub const fn item(&self) -> &Item {
        &self.item
    }

    /// Run until the stop condition holds or `shutdown` turns `true`.
    ///
    /// Every transition is published on `state`.
    pub async fn run(
        self,
        state: watch::Sender<WorkerState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerReport {
        let item_id = self.item.id;
        let mut report = WorkerReport::default();
        state.send_replace(WorkerState::Running);
        tracing::info!(item_id = %item_id, "Admission worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.drain_one(&mut report, true).await {
                Ok(true) => continue,
                Ok(false) => {
                    if self.should_stop().await {
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(item_id = %item_id, error = %err, "Wait queue poll failed");
                }
            }
            if pause(&mut shutdown, self.settings.poll_interval).await {
                break;
            }
        }

        state.send_replace(WorkerState::Draining);
        tracing::info!(item_id = %item_id, "Admission worker draining");
        if !*shutdown.borrow() {
            pause(&mut shutdown, self.settings.drain_grace).await;
        }
        loop {
            match self.drain_one(&mut report, false).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    tracing::error!(item_id = %item_id, error = %err, "Drain aborted");
                    break;
                }
            }
        }

        state.send_replace(WorkerState::Stopped);
        tracing::info!(
            item_id = %item_id,
            processed = report.processed,
            succeeded = report.succeeded,
            closed = report.closed,
            failed = report.failed,
            "Admission worker stopped"
        );
        report
    }

    /// Persist the head of the wait queue; `false` when it was empty.
    ///
    /// `returns_tickets` is `false` once the worker has decided to stop.
    async fn drain_one(
        &self,
        report: &mut WorkerReport,
        returns_tickets: bool,
    ) -> StoreResult<bool> {
        let Some(raw) = self.queues.pop_front(&QueueName::Wait.key(self.item.id)).await? else {
            return Ok(false);
        };

        let Some(entry) = WaitEntry::decode(&raw) else {
            tracing::warn!(item_id = %self.item.id, entry = %raw, "Skipping malformed wait entry");
            metrics::counter!("flashsale.worker.malformed").increment(1);
            report.malformed += 1;
            return Ok(true);
        };

        let status = self.persist(entry).await;
        report.count(status);
        if !self.record_outcome(entry.buyer_id, status, returns_tickets).await {
            report.unrecorded += 1;
        }
        Ok(true)
    }

    /// Run the purchase transaction for one admitted buyer.
    async fn persist(&self, entry: WaitEntry) -> AdmissionStatus {
        let item_id = self.item.id;
        let buyer_id = entry.buyer_id;
        let outcome =
            commit_purchase(self.inventory.as_ref(), item_id, buyer_id, entry.admitted_at).await;
        let status = match outcome {
            Ok(PurchaseOutcome::Recorded(_)) => AdmissionStatus::Success,
            Ok(PurchaseOutcome::Duplicate) => {
                tracing::warn!(item_id = %item_id, buyer_id = %buyer_id, "Buyer already recorded");
                AdmissionStatus::Repeated
            }
            Ok(PurchaseOutcome::SoldOut) => {
                tracing::warn!(
                    item_id = %item_id,
                    buyer_id = %buyer_id,
                    "Admitted buyer found no stock"
                );
                AdmissionStatus::Closed
            }
            Err(err) => {
                tracing::error!(
                    item_id = %item_id,
                    buyer_id = %buyer_id,
                    error = %err,
                    "Purchase transaction failed"
                );
                AdmissionStatus::InnerError
            }
        };
        metrics::counter!("flashsale.worker.outcomes", "status" => status.as_str()).increment(1);
        status
    }

    /// Publish a terminal status to the results or failure queue.
    ///
    /// Buyers that end up without a purchase leave the admitted set so they
    /// may try again. `Repeated` and `InnerError` took no stock, so their
    /// ticket goes back to the slot queue while `returns_tickets` holds.
    /// Returns `false` if any of these writes was given up on.
    async fn record_outcome(
        &self,
        buyer_id: BuyerId,
        status: AdmissionStatus,
        returns_tickets: bool,
    ) -> bool {
        let item_id = self.item.id;
        let policy = &self.settings.outcome_retry;
        let member = buyer_entry(buyer_id);

        let durable = matches!(status, AdmissionStatus::Success | AdmissionStatus::Repeated);
        let mut recorded = if durable {
            let key = QueueName::Results.key(item_id);
            retry_with_backoff(policy, "push_result", || self.queues.push_back(&key, &member))
                .await
                .is_ok()
        } else {
            let key = QueueName::Failure.key(item_id);
            let entry = FailureEntry { buyer_id, status }.encode();
            let admitted = QueueName::Admitted.key(item_id);
            let pushed =
                retry_with_backoff(policy, "push_failure", || self.queues.push_back(&key, &entry))
                    .await
                    .is_ok();
            let released = retry_with_backoff(policy, "release_buyer", || {
                self.queues.remove_member(&admitted, &member)
            })
            .await
            .is_ok();
            pushed && released
        };

        if matches!(status, AdmissionStatus::Repeated | AdmissionStatus::InnerError) {
            if returns_tickets {
                recorded &=
                    retry_with_backoff(policy, "release_ticket", || self.slots.release(item_id))
                        .await
                        .is_ok();
            } else {
                tracing::warn!(
                    item_id = %item_id,
                    buyer_id = %buyer_id,
                    "Worker is draining, unused ticket not returned"
                );
                metrics::counter!("flashsale.worker.tickets_withheld").increment(1);
            }
        }
        recorded
    }

    async fn should_stop(&self) -> bool {
        if self.item.has_ended(self.clock.now()) {
            tracing::debug!(item_id = %self.item.id, "Sale window has elapsed");
            return true;
        }
        match self.slots.remaining(self.item.id).await {
            Ok(remaining) => remaining == 0,
            Err(err) => {
                tracing::warn!(
                    item_id = %self.item.id,
                    error = %err,
                    "Slot queue length unavailable"
                );
                false
            }
        }
    }
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `true` when the worker should stop.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        () = sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
