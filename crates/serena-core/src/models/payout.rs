//! Payout record model
//!
//! The amount owed to the therapist for a completed, paid session. Created
//! exactly once per session; the unique session reference in the store is
//! the backstop against duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payout status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Owed, transfer not yet executed
    #[default]
    Pending,
    /// Transfer executed
    Completed,
    /// Transfer failed, needs operational follow-up
    Failed,
    /// Transfer was reversed
    Refunded,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutStatus::Pending => write!(f, "pending"),
            PayoutStatus::Completed => write!(f, "completed"),
            PayoutStatus::Failed => write!(f, "failed"),
            PayoutStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl PayoutStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PayoutStatus::Pending),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            "refunded" => Some(PayoutStatus::Refunded),
            _ => None,
        }
    }
}

/// Payout record entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecord {
    /// Unique identifier
    pub id: Uuid,

    /// Session this payout settles
    pub session_id: Uuid,

    /// Therapist owed the payout
    pub therapist_id: Uuid,

    /// Amount owed in cents
    pub amount_cents: i64,

    /// External transfer reference, if the gateway reported one
    pub gateway_transfer_id: Option<String>,

    /// Current status
    pub status: PayoutStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl PayoutRecord {
    /// Create a pending payout
    pub fn new(
        session_id: Uuid,
        therapist_id: Uuid,
        amount_cents: i64,
        gateway_transfer_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            therapist_id,
            amount_cents,
            gateway_transfer_id,
            status: PayoutStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Compute the therapist's share of a session price.
///
/// Integer floor of `total_cents * rate_bps / 10_000`; never exceeds the
/// exact proportional share.
pub fn payout_amount_cents(total_cents: i64, rate_bps: i64) -> i64 {
    total_cents * rate_bps / 10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payout_amount_floor() {
        // 90% of $123.45 = $111.105 -> floors to 11110 cents
        assert_eq!(payout_amount_cents(12_345, 9000), 11_110);
        assert_eq!(payout_amount_cents(10_000, 9000), 9_000);
        assert_eq!(payout_amount_cents(1, 9000), 0);
        assert_eq!(payout_amount_cents(0, 9000), 0);
    }

    #[test]
    fn test_payout_never_exceeds_share() {
        for total in [1, 7, 99, 10_000, 12_345, 1_000_001] {
            let payout = payout_amount_cents(total, 9000);
            // payout <= total * 0.9 exactly
            assert!(payout * 10_000 <= total * 9000);
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PayoutStatus::Pending,
            PayoutStatus::Completed,
            PayoutStatus::Failed,
            PayoutStatus::Refunded,
        ] {
            assert_eq!(PayoutStatus::from_str(&status.to_string()), Some(status));
        }
    }
}
