//! Payment record model
//!
//! One payment record exists per session. It carries the funding split
//! (subsidized vs out-of-pocket) and tracks the gateway-reported payment
//! status. The split invariant `subsidized + out_of_pocket == total` holds
//! at every point in the record's life.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payment record status, driven by gateway events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created at booking; funds not yet captured
    #[default]
    Pending,
    /// Funds captured by the gateway
    Succeeded,
    /// Charge failed at the gateway
    Failed,
    /// Charge was canceled before capture
    Canceled,
    /// Captured funds were returned
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Succeeded => write!(f, "succeeded"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Canceled => write!(f, "canceled"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl PaymentStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            "canceled" => Some(PaymentStatus::Canceled),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Statuses a record never leaves through event processing.
    ///
    /// A succeeded payment must never regress to pending or failed no
    /// matter what order duplicated events arrive in.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Refunded)
    }
}

/// Payment record entity, one-to-one with a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Unique identifier
    pub id: Uuid,

    /// Owning session
    pub session_id: Uuid,

    /// Total amount in cents
    pub amount_cents: i64,

    /// Portion covered by pools and grants, in cents
    pub subsidized_cents: i64,

    /// Portion the client pays, in cents
    pub out_of_pocket_cents: i64,

    /// External gateway payment reference (unique when present)
    pub gateway_payment_id: Option<String>,

    /// Current status
    pub status: PaymentStatus,

    /// When funds were captured
    pub captured_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Create a pending record with the whole amount out-of-pocket.
    ///
    /// The subsidy ledger rewrites the split once funding sources have been
    /// drawn down; starting at (0, total) keeps the split invariant intact
    /// before that happens.
    pub fn new(session_id: Uuid, amount_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            amount_cents,
            subsidized_cents: 0,
            out_of_pocket_cents: amount_cents,
            gateway_payment_id: None,
            status: PaymentStatus::Pending,
            captured_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Split invariant check: subsidized + out-of-pocket must equal total
    pub fn split_is_consistent(&self) -> bool {
        self.subsidized_cents >= 0
            && self.out_of_pocket_cents >= 0
            && self.subsidized_cents + self.out_of_pocket_cents == self.amount_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_split_consistent() {
        let rec = PaymentRecord::new(Uuid::new_v4(), 15_000);
        assert_eq!(rec.subsidized_cents, 0);
        assert_eq!(rec.out_of_pocket_cents, 15_000);
        assert!(rec.split_is_consistent());
    }

    #[test]
    fn test_split_inconsistency_detected() {
        let mut rec = PaymentRecord::new(Uuid::new_v4(), 10_000);
        rec.subsidized_cents = 4_000;
        assert!(!rec.split_is_consistent());

        rec.out_of_pocket_cents = 6_000;
        assert!(rec.split_is_consistent());
    }

    #[test]
    fn test_settled_statuses() {
        assert!(PaymentStatus::Succeeded.is_settled());
        assert!(PaymentStatus::Refunded.is_settled());
        assert!(!PaymentStatus::Pending.is_settled());
        assert!(!PaymentStatus::Failed.is_settled());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Succeeded,
            PaymentStatus::Failed,
            PaymentStatus::Canceled,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(PaymentStatus::from_str(&status.to_string()), Some(status));
        }
    }
}
