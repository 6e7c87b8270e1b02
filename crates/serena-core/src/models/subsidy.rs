//! Subsidy funding sources
//!
//! Two kinds of funding reduce a client's out-of-pocket cost, drawn in a
//! fixed precedence order: the sponsored pool first, then direct subsidy
//! grants. Both keep `remaining >= 0` at all times; the database CHECK
//! constraints are the final arbiter under concurrent draws.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared credit balance funded by an organizational sponsor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsoredPool {
    /// Unique identifier
    pub id: Uuid,

    /// Sponsor display name
    pub sponsor_name: String,

    /// Total credit allocated by the sponsor, in cents
    pub allocated_cents: i64,

    /// Credit still available, in cents
    pub remaining_cents: i64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl SponsoredPool {
    /// How much of `need_cents` this pool can cover
    pub fn coverable(&self, need_cents: i64) -> i64 {
        self.remaining_cents.min(need_cents).max(0)
    }
}

/// Per-client subsidy allocation, independent of any pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsidyGrant {
    /// Unique identifier
    pub id: Uuid,

    /// Client the grant belongs to
    pub client_id: Uuid,

    /// Originally granted amount in cents
    pub original_cents: i64,

    /// Amount still available in cents
    pub remaining_cents: i64,

    /// Expiry; expired grants are not eligible
    pub expires_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl SubsidyGrant {
    /// Whether this grant can still fund a booking at instant `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.remaining_cents > 0 && self.expires_at.map_or(true, |exp| exp > now)
    }

    /// How much of `need_cents` this grant can cover
    pub fn coverable(&self, need_cents: i64) -> i64 {
        self.remaining_cents.min(need_cents).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pool(remaining: i64) -> SponsoredPool {
        let now = Utc::now();
        SponsoredPool {
            id: Uuid::new_v4(),
            sponsor_name: "Acme Wellness".to_string(),
            allocated_cents: 100_000,
            remaining_cents: remaining,
            created_at: now,
            updated_at: now,
        }
    }

    fn grant(remaining: i64, expires_at: Option<DateTime<Utc>>) -> SubsidyGrant {
        let now = Utc::now();
        SubsidyGrant {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            original_cents: 50_000,
            remaining_cents: remaining,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_pool_coverage() {
        assert_eq!(pool(6_000).coverable(10_000), 6_000);
        assert_eq!(pool(10_000).coverable(6_000), 6_000);
        assert_eq!(pool(0).coverable(5_000), 0);
    }

    #[test]
    fn test_grant_eligibility() {
        let now = Utc::now();
        assert!(grant(3_000, None).is_eligible(now));
        assert!(grant(3_000, Some(now + Duration::days(30))).is_eligible(now));
        assert!(!grant(3_000, Some(now - Duration::seconds(1))).is_eligible(now));
        assert!(!grant(0, None).is_eligible(now));
    }
}
