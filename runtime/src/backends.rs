//! The external stores a flash sale runs against.

use flashsale_core::cache::ItemCache;
use flashsale_core::environment::{Clock, SystemClock};
use flashsale_core::queue::QueueStore;
use flashsale_core::store::InventoryStore;
use std::sync::Arc;

/// Shared handles to every store and the clock.
#[derive(Clone)]
pub struct Backends {
    /// Authoritative stock and purchase records
    pub inventory: Arc<dyn InventoryStore>,
    /// Per-item queues and sets
    pub queues: Arc<dyn QueueStore>,
    /// Item snapshots for exposure
    pub cache: Arc<dyn ItemCache>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Bundle the stores with the system clock.
    #[must_use]
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        queues: Arc<dyn QueueStore>,
        cache: Arc<dyn ItemCache>,
    ) -> Self {
        Self {
            inventory,
            queues,
            cache,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
