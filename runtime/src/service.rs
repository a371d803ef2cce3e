//! The flash-sale service: what a web layer calls.

use crate::backends::Backends;
use crate::circuit_breaker::{BreakerError, CircuitBreaker, State};
use crate::fallback::TransactionalFallback;
use crate::pipeline::AdmissionPipeline;
use crate::registry::{WorkerExit, WorkerRegistry};
use crate::settings::PipelineSettings;
use crate::token::TokenIssuer;
use crate::worker::WorkerState;
use chrono::{DateTime, Utc};
use flashsale_core::error::{AdmissionError, Result};
use flashsale_core::status::{AdmissionStatus, Execution};
use flashsale_core::types::{BuyerId, Exposure, Item, ItemId};
use std::sync::Arc;

/// Admission control for every item on sale.
///
/// Purchases go through the queue pipeline. A circuit breaker watches the
/// queue store; while it is open, or when a queue command fails mid-request,
/// the purchase is served by the [`TransactionalFallback`] instead. Tampered
/// tokens are rejected before either path is chosen.
///
/// # Example
///
/// ```ignore
/// let sale = FlashSale::new(backends, TokenIssuer::new(secret), PipelineSettings::default());
///
/// let exposure = sale.expose(item_id).await?;
/// let execution = sale.execute(item_id, buyer_id, exposure.token()).await;
/// let status = sale.poll(item_id, buyer_id).await?;
///
/// sale.shutdown().await;
/// ```
pub struct FlashSale {
    issuer: TokenIssuer,
    backends: Backends,
    pipeline: AdmissionPipeline,
    fallback: TransactionalFallback,
    breaker: CircuitBreaker,
    registry: Arc<WorkerRegistry>,
    settings: PipelineSettings,
}

impl FlashSale {
    /// Service over `backends`, minting tokens with `issuer`.
    #[must_use]
    pub fn new(backends: Backends, issuer: TokenIssuer, settings: PipelineSettings) -> Self {
        let registry = Arc::new(WorkerRegistry::new());
        Self {
            pipeline: AdmissionPipeline::new(
                issuer.clone(),
                backends.clone(),
                Arc::clone(&registry),
                settings.clone(),
            ),
            fallback: TransactionalFallback::new(
                Arc::clone(&backends.inventory),
                Arc::clone(&backends.clock),
            ),
            breaker: CircuitBreaker::new("queue", settings.breaker.clone()),
            issuer,
            backends,
            registry,
            settings,
        }
    }

    /// Hand out a purchase token if the item's sale is open.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the item cannot be loaded.
    pub async fn expose(&self, item_id: ItemId) -> Result<Exposure> {
        let now = self.current_time();
        let exposure = match self.pipeline.catalog().item(item_id).await? {
            Some(item) => self.issuer.expose(&item, now),
            None => Exposure::NotFound { item_id },
        };
        tracing::debug!(item_id = %item_id, exposed = exposure.is_exposed(), "Exposure requested");
        Ok(exposure)
    }

    /// Attempt a purchase.
    ///
    /// Never fails: hard errors are logged and reported as `InnerError`.
    pub async fn execute(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
        token: Option<&str>,
    ) -> Execution {
        if !self.issuer.verify(item_id, token) {
            tracing::warn!(item_id = %item_id, buyer_id = %buyer_id, "Rejected tampered token");
            metrics::counter!("flashsale.admission.rejected", "status" => "data_rewrite")
                .increment(1);
            return Execution::new(item_id, AdmissionStatus::DataRewrite);
        }

        let queued = self
            .breaker
            .call(|| self.pipeline.admit(item_id, buyer_id), is_queue_failure)
            .await;

        match queued {
            Ok(status) => Execution::new(item_id, status),
            Err(BreakerError::Open) => self.fallback.execute(item_id, buyer_id).await,
            Err(BreakerError::Inner(err)) if is_queue_failure(&err) => {
                tracing::warn!(
                    item_id = %item_id,
                    buyer_id = %buyer_id,
                    error = %err,
                    "Queue path failed, using transactional fallback"
                );
                self.fallback.execute(item_id, buyer_id).await
            }
            Err(BreakerError::Inner(err)) => {
                tracing::error!(
                    item_id = %item_id,
                    buyer_id = %buyer_id,
                    error = %err,
                    "Admission failed"
                );
                Execution::new(item_id, AdmissionStatus::InnerError)
            }
        }
    }

    /// Current admission status of `buyer_id`, `None` if they have none.
    ///
    /// Reads the queues first. A buyer served by the fallback, or any buyer
    /// while the queue store is down, is looked up in the durable store.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] when neither the queues nor the
    /// durable store can answer.
    pub async fn poll(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> Result<Option<AdmissionStatus>> {
        match self.pipeline.status(item_id, buyer_id).await {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    item_id = %item_id,
                    error = %err,
                    "Queue status unavailable, reading durable store"
                );
            }
        }
        let record = self.backends.inventory.find_purchase(item_id, buyer_id).await?;
        Ok(record.map(|_| AdmissionStatus::Success))
    }

    /// Page of items, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the durable store fails.
    pub async fn list_items(&self, offset: u32, limit: u32) -> Result<Vec<Item>> {
        Ok(self.pipeline.catalog().list(offset, limit).await?)
    }

    /// One item, through the cache.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the durable store fails.
    pub async fn item(&self, item_id: ItemId) -> Result<Option<Item>> {
        Ok(self.pipeline.catalog().item(item_id).await?)
    }

    /// Server time, for client countdowns.
    #[must_use]
    pub fn current_time(&self) -> DateTime<Utc> {
        self.backends.clock.now()
    }

    /// State of the item's worker, if it was ever started.
    #[must_use]
    pub fn worker_state(&self, item_id: ItemId) -> Option<WorkerState> {
        self.registry.state(item_id)
    }

    /// Items whose worker is still running or draining.
    #[must_use]
    pub fn active_items(&self) -> Vec<ItemId> {
        self.registry.active_items()
    }

    /// Wait until the item's worker has stopped.
    pub async fn wait_until_drained(&self, item_id: ItemId) -> Option<WorkerState> {
        self.registry.wait_for(item_id, WorkerState::Stopped).await
    }

    /// State of the queue-path breaker.
    #[must_use]
    pub fn queue_path_state(&self) -> State {
        self.breaker.state()
    }

    /// Stop every worker, waiting up to the configured timeout for each.
    pub async fn shutdown(&self) -> Vec<(ItemId, WorkerExit)> {
        self.registry.shutdown(self.settings.shutdown_timeout).await
    }
}

fn is_queue_failure(err: &AdmissionError) -> bool {
    matches!(err, AdmissionError::Store(store) if store.is_queue_failure())
}
