//! Error types for flash-sale stores and admission.

use crate::types::ItemId;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Failures of an external store (durable store, queue store, item cache).
///
/// All variants are transient from the caller's point of view: the request may
/// be retried, the core never retries a durable write on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Durable store query or transaction failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Queue store command failed.
    #[error("Queue store error: {0}")]
    Queue(String),

    /// Item cache command failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Store could not be reached at all.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failure came from the queue layer.
    ///
    /// Queue-layer failures on the hot path route the request to the
    /// transactional fallback.
    #[must_use]
    pub const fn is_queue_failure(&self) -> bool {
        matches!(self, Self::Queue(_) | Self::Unavailable(_))
    }
}

/// Hard failures of an admission call.
///
/// Expected outcomes (repeat, closed, tampered) are not errors; see
/// [`crate::status::AdmissionStatus`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// A store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The item does not exist in the durable store.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Workers are shutting down; no new item can be activated.
    #[error("Admission workers are shutting down")]
    ShuttingDown,
}
