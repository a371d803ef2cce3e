//! Queue store abstraction and the per-item queue layout.
//!
//! Every piece of hot-path state is a list or set in the queue store, keyed by
//! `"<queueName>:<itemId>"`. All mutation is expressed as single-key atomic
//! commands on the store; callers never read-modify-write.
//!
//! | Queue | Key prefix | Contents |
//! |---|---|---|
//! | Slot | `slotQueue` | one opaque ticket per unit of stock |
//! | Wait | `waitQueue` | admitted buyers pending persistence |
//! | Results | `resultsQueue` | buyers with a durable purchase |
//! | Failure | `failureQueue` | buyers whose persistence failed, with the reason |
//! | Admitted | `admittedSet` | buyers currently holding a ticket (set) |
//! | Slot marker | `slotInit` | set once when the slot queue is filled |

use crate::error::StoreResult;
use crate::status::AdmissionStatus;
use crate::store::BoxFuture;
use crate::types::{BuyerId, ItemId};
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// Names of the per-item queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// Available units of stock
    Slot,
    /// Admitted buyers waiting for the worker
    Wait,
    /// Durably confirmed buyers
    Results,
    /// Buyers whose durable write did not succeed
    Failure,
    /// Buyers holding a ticket
    Admitted,
    /// Marker proving the slot queue was filled for this sale run
    SlotMarker,
}

impl QueueName {
    /// Key prefix in the queue store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Slot => "slotQueue",
            Self::Wait => "waitQueue",
            Self::Results => "resultsQueue",
            Self::Failure => "failureQueue",
            Self::Admitted => "admittedSet",
            Self::SlotMarker => "slotInit",
        }
    }

    /// Store key of this queue for `item_id`.
    #[must_use]
    pub fn key(self, item_id: ItemId) -> String {
        format!("{}:{}", self.as_str(), item_id)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic list and set primitives of the queue store.
///
/// Single-node atomicity per key is assumed. The only multi-key operation,
/// [`QueueStore::initialize_once`], must be atomic as a whole.
pub trait QueueStore: Send + Sync {
    /// Append `value` to the tail of the list at `key`; returns the new length.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn push_back(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<u64>>;

    /// Atomically remove and return the head of the list at `key`.
    ///
    /// Returns `None` when the list is empty or missing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn pop_front(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<String>>>;

    /// Length of the list at `key` (0 when missing).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn len(&self, key: &str) -> BoxFuture<'_, StoreResult<u64>>;

    /// Whether the list at `key` holds `value`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn contains(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>>;

    /// All elements of the list at `key`, head first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn range(&self, key: &str) -> BoxFuture<'_, StoreResult<Vec<String>>>;

    /// Whether anything is stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn exists(&self, key: &str) -> BoxFuture<'_, StoreResult<bool>>;

    /// Set `marker_key` and push `values` onto `list_key` as one atomic step,
    /// only if `marker_key` is absent.
    ///
    /// Returns `true` for the single caller that performed the push.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails; nothing is pushed.
    fn initialize_once(
        &self,
        marker_key: &str,
        list_key: &str,
        values: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<bool>>;

    /// Add `value` to the set at `key`; `false` if it was already a member.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn add_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>>;

    /// Remove `value` from the set at `key`; `false` if it was not a member.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn remove_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>>;

    /// Whether `value` is in the set at `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Queue` if the command fails.
    fn is_member(&self, key: &str, value: &str) -> BoxFuture<'_, StoreResult<bool>>;
}

// ============================================================================
// Entry encodings
// ============================================================================

const USER_PREFIX: &str = "user:";

/// Buyer marker stored in the results queue and the admitted set.
#[must_use]
pub fn buyer_entry(buyer_id: BuyerId) -> String {
    format!("{USER_PREFIX}{buyer_id}")
}

/// Parse a [`buyer_entry`].
#[must_use]
pub fn parse_buyer_entry(entry: &str) -> Option<BuyerId> {
    entry.strip_prefix(USER_PREFIX)?.parse().ok()
}

/// Wait-queue entry: the buyer and the instant their ticket was claimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitEntry {
    /// Admitted buyer
    pub buyer_id: BuyerId,
    /// When the ticket was claimed
    pub admitted_at: DateTime<Utc>,
}

impl WaitEntry {
    /// Encode as `user:<buyer>:<millis>`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{USER_PREFIX}{}:{}",
            self.buyer_id,
            self.admitted_at.timestamp_millis()
        )
    }

    /// Decode an entry produced by [`WaitEntry::encode`].
    #[must_use]
    pub fn decode(entry: &str) -> Option<Self> {
        let rest = entry.strip_prefix(USER_PREFIX)?;
        let (buyer, millis) = rest.split_once(':')?;
        let admitted_at = Utc.timestamp_millis_opt(millis.parse().ok()?).single()?;
        Some(Self {
            buyer_id: buyer.parse().ok()?,
            admitted_at,
        })
    }
}

/// Failure-queue entry: the buyer and the terminal status their write ended in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureEntry {
    /// Buyer whose write failed
    pub buyer_id: BuyerId,
    /// Terminal status (`Closed` or `InnerError`)
    pub status: AdmissionStatus,
}

impl FailureEntry {
    /// Encode as `user:<buyer>:<status code>`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{USER_PREFIX}{}:{}", self.buyer_id, self.status.code())
    }

    /// Decode an entry produced by [`FailureEntry::encode`].
    #[must_use]
    pub fn decode(entry: &str) -> Option<Self> {
        let rest = entry.strip_prefix(USER_PREFIX)?;
        let (buyer, code) = rest.split_once(':')?;
        Some(Self {
            buyer_id: buyer.parse().ok()?,
            status: AdmissionStatus::from_code(code.parse().ok()?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_name_colon_item() {
        let item = ItemId::new(1001);
        assert_eq!(QueueName::Slot.key(item), "slotQueue:1001");
        assert_eq!(QueueName::Results.key(item), "resultsQueue:1001");
        assert_eq!(QueueName::Failure.key(item), "failureQueue:1001");
    }

    #[test]
    fn wait_entry_keeps_admission_millis() {
        let admitted_at = Utc.timestamp_millis_opt(1_700_000_000_123).single();
        let Some(admitted_at) = admitted_at else {
            return;
        };
        let entry = WaitEntry {
            buyer_id: BuyerId::new(13_007_611_111),
            admitted_at,
        };
        assert_eq!(entry.encode(), "user:13007611111:1700000000123");
        assert_eq!(WaitEntry::decode(&entry.encode()), Some(entry));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert_eq!(WaitEntry::decode("nil"), None);
        assert_eq!(WaitEntry::decode("user:abc:12"), None);
        assert_eq!(FailureEntry::decode("user:12:99"), None);
        assert_eq!(parse_buyer_entry("buyer:12"), None);
    }

    #[test]
    fn failure_entry_carries_status() {
        let entry = FailureEntry {
            buyer_id: BuyerId::new(5),
            status: AdmissionStatus::Closed,
        };
        assert_eq!(entry.encode(), "user:5:0");
        assert_eq!(FailureEntry::decode("user:5:0"), Some(entry));
    }
}
