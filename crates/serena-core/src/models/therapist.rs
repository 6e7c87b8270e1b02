//! Therapist gateway account model
//!
//! Capability flags mirrored from the payment gateway's connected account.
//! They gate whether new bookings and payouts can be taken for a therapist;
//! the gateway's account-updated events keep them current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Therapist payout-eligibility flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TherapistAccount {
    /// Therapist identifier
    pub therapist_id: Uuid,

    /// Connected account id at the payment gateway
    pub gateway_account_id: String,

    /// Gateway will accept charges for this account
    pub charges_enabled: bool,

    /// Gateway will execute transfers to this account
    pub payouts_enabled: bool,

    /// Onboarding paperwork finished at the gateway
    pub details_submitted: bool,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl TherapistAccount {
    /// Whether new bookings may be taken for this therapist
    pub fn can_take_bookings(&self) -> bool {
        self.charges_enabled && self.details_submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_gate() {
        let mut acct = TherapistAccount {
            therapist_id: Uuid::new_v4(),
            gateway_account_id: "acct_123".to_string(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
            updated_at: Utc::now(),
        };
        assert!(acct.can_take_bookings());

        acct.charges_enabled = false;
        assert!(!acct.can_take_bookings());
    }
}
