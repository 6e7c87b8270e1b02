//! Processed-event ledger model
//!
//! Records every external gateway event id that has been handled. The
//! primary-key uniqueness on the event id is what makes settlement
//! idempotent under at-least-once webhook delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The event mutated financial state
    Processed,
    /// Malformed metadata; acknowledged and dropped
    Discarded,
    /// Recognized but intentionally not acted on
    Ignored,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventOutcome::Processed => write!(f, "processed"),
            EventOutcome::Discarded => write!(f, "discarded"),
            EventOutcome::Ignored => write!(f, "ignored"),
        }
    }
}

impl EventOutcome {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "processed" => Some(EventOutcome::Processed),
            "discarded" => Some(EventOutcome::Discarded),
            "ignored" => Some(EventOutcome::Ignored),
            _ => None,
        }
    }
}

/// A handled gateway event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Globally unique gateway event id
    pub event_id: String,

    /// Gateway event type tag
    pub event_type: String,

    /// Handling outcome
    pub outcome: EventOutcome,

    /// When the event was handled
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_round_trip() {
        for outcome in [
            EventOutcome::Processed,
            EventOutcome::Discarded,
            EventOutcome::Ignored,
        ] {
            assert_eq!(EventOutcome::from_str(&outcome.to_string()), Some(outcome));
        }
        assert_eq!(EventOutcome::from_str("other"), None);
    }
}
