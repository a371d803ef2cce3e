//! Admission outcomes.
//!
//! Expected outcomes of a purchase attempt (accepted, repeated, closed,
//! tampered) are values of [`AdmissionStatus`], not errors. Hard failures
//! travel through [`crate::error::AdmissionError`] instead.

use crate::types::{ItemId, PurchaseRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a buyer's admission for one item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    /// Ticket claimed, durable write not yet confirmed
    Pending,
    /// Purchase accepted (or durably recorded, when polled)
    Success,
    /// Buyer already holds a ticket or a purchase record
    Repeated,
    /// No stock left or the sale window elapsed
    Closed,
    /// Token missing or forged
    DataRewrite,
    /// A store failed while handling the request
    InnerError,
}

impl AdmissionStatus {
    /// Stable numeric code, as exposed to web callers.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Pending => 2,
            Self::Success => 1,
            Self::Closed => 0,
            Self::Repeated => -1,
            Self::InnerError => -2,
            Self::DataRewrite => -3,
        }
    }

    /// Short snake_case name, used as a log field and metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Repeated => "repeated",
            Self::Closed => "closed",
            Self::DataRewrite => "data_rewrite",
            Self::InnerError => "inner_error",
        }
    }

    /// Human readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Pending => "queued",
            Self::Success => "purchase succeeded",
            Self::Closed => "sale closed",
            Self::Repeated => "repeated purchase",
            Self::InnerError => "internal error",
            Self::DataRewrite => "request tampered",
        }
    }

    /// Parse a numeric code back into a status.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            2 => Some(Self::Pending),
            1 => Some(Self::Success),
            0 => Some(Self::Closed),
            -1 => Some(Self::Repeated),
            -2 => Some(Self::InnerError),
            -3 => Some(Self::DataRewrite),
            _ => None,
        }
    }

    /// Whether the status is final for the buyer.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for AdmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Result of one purchase attempt.
///
/// `record` is only filled when the durable write happened synchronously
/// (the transactional path). The queue path answers before persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// Item the attempt was for
    pub item_id: ItemId,
    /// Outcome
    pub status: AdmissionStatus,
    /// Durable purchase, when known
    pub record: Option<PurchaseRecord>,
}

impl Execution {
    /// Outcome without a purchase record.
    #[must_use]
    pub const fn new(item_id: ItemId, status: AdmissionStatus) -> Self {
        Self {
            item_id,
            status,
            record: None,
        }
    }

    /// Successful outcome carrying the durable record.
    #[must_use]
    pub const fn recorded(record: PurchaseRecord) -> Self {
        Self {
            item_id: record.item_id,
            status: AdmissionStatus::Success,
            record: Some(record),
        }
    }
}
