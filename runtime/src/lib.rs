//! # Flash Sale Runtime
//!
//! Admission control for time-boxed, limited-quantity sales.
//!
//! ## Core Components
//!
//! - **[`TokenIssuer`]**: mints and verifies exposure tokens for open sales
//! - **[`SlotQueue`]**: one ticket per unit of stock, claimed by atomic pop
//! - **[`AdmissionPipeline`]**: token check, lazy activation, ticket claim,
//!   hand-off to the wait queue
//! - **[`AdmissionWorker`]**: persists admissions for one item and publishes
//!   their durable outcome
//! - **[`WorkerRegistry`]**: starts each item's worker once, reports its
//!   state, and stops all workers on shutdown
//! - **[`TransactionalFallback`]**: the same purchase as one durable
//!   transaction, for when the queue store is unavailable
//! - **[`FlashSale`]**: the service facade that picks between the two paths
//!
//! ## Guarantees
//!
//! - Successful purchases never exceed stock: claims are atomic pops and the
//!   durable decrement is conditioned on `remaining_stock > 0`.
//! - A buyer wins at most once per item: the admitted set rejects concurrent
//!   duplicates and the `(item, buyer)` constraint rejects everything else.
//! - A purchase record and its stock decrement commit together or not at all.
//!
//! ## Example
//!
//! ```ignore
//! use flashsale_runtime::{Backends, FlashSale, PipelineSettings, TokenIssuer};
//!
//! let sale = FlashSale::new(
//!     Backends::new(inventory, queues, cache),
//!     TokenIssuer::new(secret),
//!     PipelineSettings::default(),
//! );
//!
//! if let Exposure::Open { token, .. } = sale.expose(item_id).await? {
//!     let execution = sale.execute(item_id, buyer_id, Some(&token)).await;
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backends;
pub mod catalog;
pub mod circuit_breaker;
pub mod fallback;
pub mod metrics;
pub mod pipeline;
pub mod purchase;
pub mod registry;
pub mod retry;
pub mod service;
pub mod settings;
pub mod slots;
pub mod token;
pub mod worker;

pub use backends::Backends;
pub use catalog::ItemCatalog;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use fallback::TransactionalFallback;
pub use pipeline::AdmissionPipeline;
pub use purchase::{PurchaseOutcome, commit_purchase};
pub use registry::{WorkerExit, WorkerRegistry};
pub use retry::RetryPolicy;
pub use service::FlashSale;
pub use settings::PipelineSettings;
pub use slots::SlotQueue;
pub use token::TokenIssuer;
pub use worker::{AdmissionWorker, WorkerReport, WorkerState};
