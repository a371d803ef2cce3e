//! Domain types for flash-sale admission control.
//!
//! Identifiers, the sale item, the durable purchase record, and the exposure
//! result handed to buyers before they may attempt a purchase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of an item on sale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(i64);

impl ItemId {
    /// Create an `ItemId` from its raw value
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a buyer.
///
/// Buyers are identified by an opaque number (a phone number in the original
/// deployment). No session or authentication is attached to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuyerId(i64);

impl BuyerId {
    /// Create a `BuyerId` from its raw value
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for BuyerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BuyerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// ============================================================================
// Item
// ============================================================================

/// An item offered in a time-boxed flash sale.
///
/// `remaining_stock` is authoritative only in the durable store; copies held in
/// caches are used for window checks and are never decremented.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Units left for sale (never negative)
    pub remaining_stock: u32,
    /// Sale opens at this instant (inclusive)
    pub start_time: DateTime<Utc>,
    /// Sale closes at this instant (inclusive)
    pub end_time: DateTime<Utc>,
    /// When the item row was created
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Whether `now` falls inside `[start_time, end_time]`.
    #[must_use]
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now <= self.end_time
    }

    /// Whether the sale is open: inside the window and with stock left.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.in_window(now) && self.remaining_stock > 0
    }

    /// Whether the sale window has elapsed.
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }
}

// ============================================================================
// Purchase record
// ============================================================================

/// A durable purchase, unique on `(item_id, buyer_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Item purchased
    pub item_id: ItemId,
    /// Buyer who purchased it
    pub buyer_id: BuyerId,
    /// When the purchase was recorded
    pub purchased_at: DateTime<Utc>,
}

// ============================================================================
// Exposure
// ============================================================================

/// Result of asking for a purchase token.
///
/// Only [`Exposure::Open`] carries a token. The other variants carry enough
/// information for a caller to render "not started", "ended" or "unknown item".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Exposure {
    /// The sale is open and a token was minted
    Open {
        /// Item the token is bound to
        item_id: ItemId,
        /// Token to present on submission
        token: String,
    },
    /// The sale exists but `now` is outside its window
    Closed {
        /// Item that was asked for
        item_id: ItemId,
        /// Server time used for the check
        now: DateTime<Utc>,
        /// Sale start
        start_time: DateTime<Utc>,
        /// Sale end
        end_time: DateTime<Utc>,
    },
    /// No such item
    NotFound {
        /// Item that was asked for
        item_id: ItemId,
    },
}

impl Exposure {
    /// Whether a token was handed out.
    #[must_use]
    pub const fn is_exposed(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The minted token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Open { token, .. } => Some(token),
            Self::Closed { .. } | Self::NotFound { .. } => None,
        }
    }

    /// Item this exposure refers to.
    #[must_use]
    pub const fn item_id(&self) -> ItemId {
        match self {
            Self::Open { item_id, .. }
            | Self::Closed { item_id, .. }
            | Self::NotFound { item_id } => *item_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(start: DateTime<Utc>, end: DateTime<Utc>, stock: u32) -> Item {
        Item {
            id: ItemId::new(1000),
            name: "1000 yuan for an iPhone".to_string(),
            remaining_stock: stock,
            start_time: start,
            end_time: end,
            created_at: start,
        }
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let item = item(start, end, 10);

        assert!(item.in_window(start));
        assert!(item.in_window(end));
        assert!(!item.in_window(start - Duration::milliseconds(1)));
        assert!(!item.in_window(end + Duration::milliseconds(1)));
    }

    #[test]
    fn sold_out_item_is_not_open() {
        let start = Utc::now();
        let item = item(start, start + Duration::hours(1), 0);
        assert!(item.in_window(start));
        assert!(!item.is_open(start));
    }

    #[test]
    fn exposure_serializes_with_state_tag() {
        let exposure = Exposure::NotFound {
            item_id: ItemId::new(7),
        };
        let json = serde_json::to_string(&exposure).unwrap_or_default();
        assert!(json.contains("\"state\":\"not_found\""));
        assert!(!exposure.is_exposed());
        assert_eq!(exposure.token(), None);
    }

    #[test]
    fn buyer_id_parses_from_string() {
        assert_eq!("13502171125".parse::<BuyerId>().ok(), Some(BuyerId::new(13_502_171_125)));
        assert!("user".parse::<BuyerId>().is_err());
    }

    proptest::proptest! {
        #[test]
        fn window_membership_matches_offset(
            length in 0i64..86_400_000,
            offset in -86_400_000i64..172_800_000,
        ) {
            let start = Utc::now();
            let item = item(start, start + Duration::milliseconds(length), 1);
            let at = start + Duration::milliseconds(offset);

            proptest::prop_assert_eq!(item.in_window(at), (0..=length).contains(&offset));
            proptest::prop_assert_eq!(item.has_ended(at), offset > length);
        }
    }
}
