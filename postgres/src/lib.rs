//! `PostgreSQL` inventory store for flash-sale admission control.
//!
//! This crate provides the durable half of the system: the `items` table with
//! authoritative remaining stock and the `purchase_records` table whose
//! primary key makes purchases at-most-once per buyer. It implements the
//! `InventoryStore` trait from `flashsale-core` using runtime-checked sqlx
//! queries.
//!
//! # Example
//!
//! ```ignore
//! use flashsale_postgres::PostgresInventoryStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresInventoryStore::connect(&database_url, 10, timeout).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod inventory;

pub use inventory::{PostgresInventoryStore, PostgresTransaction};
