//! # Flash Sale Testing
//!
//! Testing utilities for flash-sale admission control.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - In-memory implementations of every store trait, with the same atomicity
//!   guarantees as the production adapters
//! - Failure injection to exercise fallback and rollback paths
//! - Item builders for common sale shapes
//!
//! ## Example
//!
//! ```ignore
//! use flashsale_testing::{InMemoryInventoryStore, InMemoryQueueStore, test_clock, open_item};
//!
//! #[tokio::test]
//! async fn three_units() {
//!     let clock = test_clock();
//!     let inventory = InMemoryInventoryStore::new().with_item(open_item(1000, 3, clock.now()));
//!     let queues = InMemoryQueueStore::new();
//!     // build the pipeline around them...
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use flashsale_core::environment::Clock;
use flashsale_core::types::{Item, ItemId};
use std::sync::{Arc, Mutex};

pub mod cache_mocks;
pub mod inventory_mocks;
pub mod queue_mocks;

pub use cache_mocks::InMemoryItemCache;
pub use inventory_mocks::InMemoryInventoryStore;
pub use queue_mocks::InMemoryQueueStore;

/// Mock clocks.
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flashsale_testing::mocks::FixedClock;
    /// use flashsale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same instant, so a test can hold one handle and
    /// advance time under a running worker.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }

        /// Jump to `time`.
        pub fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut time) = self.time.lock() {
                *time = to;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.lock().map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Item builders.
pub mod fixtures {
    use super::{DateTime, Duration, Item, ItemId, Utc};

    /// An item whose sale window is `[now - 1h, now + 1h]`.
    #[must_use]
    pub fn open_item(id: i64, stock: u32, now: DateTime<Utc>) -> Item {
        Item {
            id: ItemId::new(id),
            name: format!("flash sale item {id}"),
            remaining_stock: stock,
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            created_at: now - Duration::days(1),
        }
    }

    /// An item whose sale starts an hour after `now`.
    #[must_use]
    pub fn upcoming_item(id: i64, stock: u32, now: DateTime<Utc>) -> Item {
        Item {
            start_time: now + Duration::hours(1),
            end_time: now + Duration::hours(2),
            ..open_item(id, stock, now)
        }
    }

    /// An item whose sale ended an hour before `now`.
    #[must_use]
    pub fn ended_item(id: i64, stock: u32, now: DateTime<Utc>) -> Item {
        Item {
            start_time: now - Duration::hours(2),
            end_time: now - Duration::hours(1),
            ..open_item(id, stock, now)
        }
    }
}

/// Install a test subscriber once so `tracing` output shows up with `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashsale_runtime=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use fixtures::{ended_item, open_item, upcoming_item};
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};
