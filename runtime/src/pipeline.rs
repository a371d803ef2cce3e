//! Queue-backed admission.
//!
//! A submission never waits for the durable store. It verifies the token,
//! activates the item on first use, and then either claims a ticket and joins
//! the wait queue (`Success`) or is turned away (`Repeated`, `Closed`). The
//! item's [`AdmissionWorker`] persists the admission later and publishes the
//! durable outcome, which [`AdmissionPipeline::status`] reads back.
//!
//! Every mutation is a single-key atomic command on the queue store:
//!
//! 1. `add_member(admittedSet)` lets exactly one concurrent request per buyer
//!    through; the rest are `Repeated`.
//! 2. `pop_front(slotQueue)` is the only oversell guard.
//! 3. `push_back(waitQueue)` hands the admission to the worker.

use crate::backends::Backends;
use crate::catalog::ItemCatalog;
use crate::registry::WorkerRegistry;
use crate::settings::PipelineSettings;
use crate::slots::SlotQueue;
use crate::token::TokenIssuer;
use crate::worker::{AdmissionWorker, WorkerState};
use chrono::{DateTime, Utc};
use flashsale_core::error::{AdmissionError, Result, StoreResult};
use flashsale_core::queue::{FailureEntry, QueueName, WaitEntry, buyer_entry};
use flashsale_core::status::AdmissionStatus;
use flashsale_core::types::{BuyerId, Item, ItemId};
use std::sync::Arc;

/// Admission through the per-item queues.
#[derive(Clone)]
pub struct AdmissionPipeline {
    issuer: TokenIssuer,
    backends: Backends,
    catalog: ItemCatalog,
    slots: SlotQueue,
    registry: Arc<WorkerRegistry>,
    settings: PipelineSettings,
}

impl AdmissionPipeline {
    /// Pipeline over `backends`, starting workers in `registry`.
    #[must_use]
    pub fn new(
        issuer: TokenIssuer,
        backends: Backends,
        registry: Arc<WorkerRegistry>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            catalog: ItemCatalog::new(
                Arc::clone(&backends.inventory),
                Arc::clone(&backends.cache),
                settings.item_cache_ttl,
            ),
            slots: SlotQueue::new(Arc::clone(&backends.queues)),
            issuer,
            backends,
            registry,
            settings,
        }
    }

    /// Item lookups used by this pipeline.
    #[must_use]
    pub const fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    /// Worker registry used by this pipeline.
    #[must_use]
    pub const fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Submit a purchase attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::ItemNotFound`] for an unknown item,
    /// [`AdmissionError::ShuttingDown`] if the item needs a worker after
    /// shutdown, and [`AdmissionError::Store`] when a store fails.
    pub async fn submit(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
        token: Option<&str>,
    ) -> Result<AdmissionStatus> {
        if !self.issuer.verify(item_id, token) {
            tracing::warn!(item_id = %item_id, buyer_id = %buyer_id, "Rejected tampered token");
            metrics::counter!("flashsale.admission.rejected", "status" => "data_rewrite")
                .increment(1);
            return Ok(AdmissionStatus::DataRewrite);
        }
        self.admit(item_id, buyer_id).await
    }

    /// Admit a buyer whose token has already been verified.
    pub(crate) async fn admit(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> Result<AdmissionStatus> {
        let now = self.backends.clock.now();
        let item = self.activate(item_id, now).await?;
        let status = self.claim(&item, buyer_id, now).await?;

        tracing::debug!(
            item_id = %item_id,
            buyer_id = %buyer_id,
            status = status.as_str(),
            "Admission decided"
        );
        metrics::counter!("flashsale.admission.decisions", "status" => status.as_str())
            .increment(1);
        Ok(status)
    }

    /// Make sure the item's tickets exist and its worker runs.
    ///
    /// Returns the item snapshot the sale run uses. An item whose sale has
    /// already ended is not activated.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::ItemNotFound`] for an unknown item,
    /// [`AdmissionError::ShuttingDown`] after registry shutdown, and
    /// [`AdmissionError::Store`] when a store fails.
    pub async fn activate(&self, item_id: ItemId, now: DateTime<Utc>) -> Result<Item> {
        if let Some(item) = self.registry.item(item_id) {
            return Ok(item);
        }

        let snapshot = self
            .catalog
            .item(item_id)
            .await?
            .ok_or(AdmissionError::ItemNotFound(item_id))?;
        if snapshot.has_ended(now) {
            return Ok(snapshot);
        }

        let item = self
            .catalog
            .authoritative(item_id)
            .await?
            .ok_or(AdmissionError::ItemNotFound(item_id))?;
        self.slots.initialize(item_id, item.remaining_stock).await?;

        let worker = AdmissionWorker::new(
            item.clone(),
            Arc::clone(&self.backends.queues),
            Arc::clone(&self.backends.inventory),
            Arc::clone(&self.backends.clock),
            self.settings.clone(),
        );
        if self.registry.start(worker)? {
            tracing::info!(item_id = %item_id, stock = item.remaining_stock, "Item activated");
        }
        Ok(item)
    }

    async fn claim(
        &self,
        item: &Item,
        buyer_id: BuyerId,
        now: DateTime<Utc>,
    ) -> Result<AdmissionStatus> {
        let queues = &self.backends.queues;
        let member = buyer_entry(buyer_id);

        if queues.contains(&QueueName::Results.key(item.id), &member).await? {
            return Ok(AdmissionStatus::Repeated);
        }

        let admitted = QueueName::Admitted.key(item.id);
        if !queues.add_member(&admitted, &member).await? {
            return Ok(AdmissionStatus::Repeated);
        }

        let claimed = if item.in_window(now) {
            self.slots.claim(item.id).await
        } else {
            Ok(false)
        };
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                queues.remove_member(&admitted, &member).await?;
                return Ok(AdmissionStatus::Closed);
            }
            Err(err) => {
                self.forget(item.id, &member, false).await;
                return Err(err.into());
            }
        }

        let entry = WaitEntry {
            buyer_id,
            admitted_at: now,
        };
        if let Err(err) = queues.push_back(&QueueName::Wait.key(item.id), &entry.encode()).await {
            self.forget(item.id, &member, true).await;
            return Err(err.into());
        }
        Ok(AdmissionStatus::Success)
    }

    /// Best-effort undo of a half-finished admission.
    ///
    /// The ticket only goes back while the item's worker is still running.
    async fn forget(&self, item_id: ItemId, member: &str, return_ticket: bool) {
        let queues = &self.backends.queues;
        if let Err(err) = queues.remove_member(&QueueName::Admitted.key(item_id), member).await {
            tracing::warn!(
                item_id = %item_id,
                buyer = member,
                error = %err,
                "Could not release buyer"
            );
        }
        if return_ticket && self.registry.state(item_id) == Some(WorkerState::Running) {
            if let Err(err) = self.slots.release(item_id).await {
                tracing::warn!(item_id = %item_id, error = %err, "Could not return ticket");
            }
        }
    }

    /// Latest known admission status of `buyer_id`.
    ///
    /// `Success` once the purchase is durable, `Pending` while the buyer holds
    /// a ticket the worker has not persisted yet, the recorded status after a
    /// failed persist, and `None` when the buyer never got a ticket. A buyer
    /// left in the admitted set without a wait entry is looked up in the
    /// durable store.
    ///
    /// # Errors
    ///
    /// Returns the queue store's or the durable store's error.
    pub async fn status(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> StoreResult<Option<AdmissionStatus>> {
        let queues = &self.backends.queues;
        let member = buyer_entry(buyer_id);

        if queues.contains(&QueueName::Results.key(item_id), &member).await? {
            return Ok(Some(AdmissionStatus::Success));
        }
        if queues.is_member(&QueueName::Admitted.key(item_id), &member).await? {
            let waiting = queues
                .range(&QueueName::Wait.key(item_id))
                .await?
                .iter()
                .filter_map(|raw| WaitEntry::decode(raw))
                .any(|entry| entry.buyer_id == buyer_id);
            if !waiting
                && self
                    .backends
                    .inventory
                    .find_purchase(item_id, buyer_id)
                    .await?
                    .is_some()
            {
                return Ok(Some(AdmissionStatus::Success));
            }
            return Ok(Some(AdmissionStatus::Pending));
        }
        let failures = queues.range(&QueueName::Failure.key(item_id)).await?;
        Ok(failures
            .iter()
            .rev()
            .filter_map(|raw| FailureEntry::decode(raw))
            .find(|entry| entry.buyer_id == buyer_id)
            .map(|entry| entry.status))
    }
}
