//! # Flash Sale Core
//!
//! Core types and traits for flash-sale admission control.
//!
//! A flash sale offers a small, fixed inventory to a flood of concurrent
//! buyers inside a time window. This crate defines the vocabulary shared by
//! the runtime and the store adapters:
//!
//! - **Types**: [`ItemId`], [`BuyerId`], [`Item`], [`PurchaseRecord`], [`Exposure`]
//! - **Outcomes**: [`AdmissionStatus`] and [`Execution`]
//! - **Errors**: [`StoreError`] for store failures, [`AdmissionError`] for hard
//!   failures of an admission call
//! - **Environment**: [`InventoryStore`], [`QueueStore`], [`ItemCache`], [`Clock`]
//!
//! ## Guarantees the stores must provide
//!
//! - `QueueStore::pop_front` is a genuine atomic take; it is the only guard
//!   against overselling on the hot path.
//! - `InventoryTransaction::insert_purchase` is conditioned on the
//!   `(item, buyer)` uniqueness constraint; `decrement_stock` on
//!   `remaining_stock > 0`. Both report affected rows.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod environment;
pub mod error;
pub mod queue;
pub mod status;
pub mod store;
pub mod types;

pub use cache::ItemCache;
pub use environment::{Clock, SystemClock};
pub use error::{AdmissionError, StoreError, StoreResult};
pub use queue::{QueueName, QueueStore};
pub use status::{AdmissionStatus, Execution};
pub use store::{BoxFuture, InventoryStore, InventoryTransaction};
pub use types::{BuyerId, Exposure, Item, ItemId, PurchaseRecord};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
