//! Therapy session model
//!
//! A session is an exclusive (therapist, start-time) booking between a
//! therapist and a client. At most one non-cancelled session may exist for
//! a given (therapist, start-time) pair; the database enforces that with a
//! partial unique index.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Session lifecycle status
///
/// The happy path is `pending -> confirmed -> scheduled -> completed`.
/// `cancelled` and `rescheduled` are reachable from any pre-completed state.
/// `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Booked, payment authorization not yet confirmed
    #[default]
    Pending,
    /// Payment hold in place, session will happen
    Confirmed,
    /// Confirmed and synced to the therapist's calendar
    Scheduled,
    /// Session happened and settlement finished
    Completed,
    /// Booking was cancelled; slot is free again
    Cancelled,
    /// Superseded by a fresh booking at another time
    Rescheduled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Confirmed => write!(f, "confirmed"),
            SessionStatus::Scheduled => write!(f, "scheduled"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

impl SessionStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(SessionStatus::Pending),
            "confirmed" => Some(SessionStatus::Confirmed),
            "scheduled" => Some(SessionStatus::Scheduled),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "rescheduled" => Some(SessionStatus::Rescheduled),
            _ => None,
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// States from which completion is allowed
    pub fn can_complete(&self) -> bool {
        matches!(self, SessionStatus::Confirmed | SessionStatus::Scheduled)
    }

    /// States from which cancellation is allowed
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Confirmed | SessionStatus::Scheduled
        )
    }
}

/// Who drove a session to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// Therapist confirmed the session manually
    Therapist,
    /// Auto-completion sweep finished a stale session
    System,
}

impl fmt::Display for CompletionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionSource::Therapist => write!(f, "therapist"),
            CompletionSource::System => write!(f, "system"),
        }
    }
}

impl CompletionSource {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "therapist" => Some(CompletionSource::Therapist),
            "system" => Some(CompletionSource::System),
            _ => None,
        }
    }
}

/// Therapy session entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: Uuid,

    /// Therapist providing the session
    pub therapist_id: Uuid,

    /// Client receiving the session
    pub client_id: Uuid,

    /// Scheduled start time
    pub start_time: DateTime<Utc>,

    /// Scheduled end time
    pub end_time: DateTime<Utc>,

    /// Lifecycle status
    pub status: SessionStatus,

    /// Total session price in minor currency units
    pub price_cents: i64,

    /// Sponsored pool this booking draws on, if any
    pub sponsored_pool_id: Option<Uuid>,

    /// Direct subsidy applied to this session in cents, if any
    pub subsidy_applied_cents: Option<i64>,

    /// Who completed the session (audit only)
    pub completion_source: Option<CompletionSource>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new pending session
    pub fn new(
        therapist_id: Uuid,
        client_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        price_cents: i64,
        sponsored_pool_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            therapist_id,
            client_id,
            start_time,
            end_time,
            status: SessionStatus::Pending,
            price_cents,
            sponsored_pool_id,
            subsidy_applied_cents: None,
            completion_source: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scheduled end has passed `grace` ago at instant `now`.
    ///
    /// Used by the auto-completion sweep: a session ending exactly at the
    /// grace boundary is eligible.
    pub fn ended_before_grace(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.end_time <= now - grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(status: SessionStatus, end_time: DateTime<Utc>) -> Session {
        let mut s = Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            end_time - Duration::hours(1),
            end_time,
            12_000,
            None,
        );
        s.status = status;
        s
    }

    #[test]
    fn test_status_transitions() {
        assert!(SessionStatus::Confirmed.can_complete());
        assert!(SessionStatus::Scheduled.can_complete());
        assert!(!SessionStatus::Pending.can_complete());
        assert!(!SessionStatus::Completed.can_complete());

        assert!(SessionStatus::Pending.can_cancel());
        assert!(!SessionStatus::Completed.can_cancel());
        assert!(!SessionStatus::Cancelled.can_cancel());

        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Rescheduled.is_terminal());
    }

    #[test]
    fn test_grace_boundary() {
        let now = Utc::now();
        let grace = Duration::hours(24);

        // Ended 24h + 1s ago: eligible
        let s = session_with(SessionStatus::Confirmed, now - grace - Duration::seconds(1));
        assert!(s.ended_before_grace(now, grace));

        // Ended 23h ago: not eligible
        let s = session_with(SessionStatus::Confirmed, now - Duration::hours(23));
        assert!(!s.ended_before_grace(now, grace));

        // Exactly at the boundary: eligible
        let s = session_with(SessionStatus::Confirmed, now - grace);
        assert!(s.ended_before_grace(now, grace));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Confirmed,
            SessionStatus::Scheduled,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Rescheduled,
        ] {
            assert_eq!(SessionStatus::from_str(&status.to_string()), Some(status));
        }
        assert_eq!(SessionStatus::from_str("bogus"), None);
    }
}
