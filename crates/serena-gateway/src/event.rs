//! Inbound gateway event model
//!
//! Webhook deliveries arrive as a JSON envelope carrying a globally unique
//! event id, a type tag, and a type-dependent payload. The envelope is
//! lifted into a closed `GatewayEventKind` so every event type is matched
//! exhaustively; types outside the allow-list become `Unknown`, an explicit
//! variant rather than a silent default branch.
//!
//! Events may arrive duplicated and out of order. Nothing here assumes
//! delivery order; the settlement core's idempotency ledger does the rest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::constants;

/// Raw webhook envelope as delivered by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique event id
    pub id: String,

    /// Event type tag
    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp of event creation at the gateway
    #[serde(default)]
    pub created: Option<i64>,

    /// Type-dependent payload
    #[serde(default)]
    pub data: Value,
}

/// Metadata problems that make an event unprocessable.
///
/// Retrying will not fix malformed data, so these are logged and the event
/// is acknowledged and dropped.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Malformed event payload: {0}")]
    Malformed(String),

    #[error("Invalid {field} reference: {value}")]
    InvalidReference { field: &'static str, value: String },
}

/// Identifier references every settlement-relevant event must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRefs {
    pub session_id: Uuid,
    pub client_id: Uuid,
    pub therapist_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    session_id: String,
    client_id: String,
    therapist_id: String,
}

impl TryFrom<RawMetadata> for SessionRefs {
    type Error = MetadataError;

    fn try_from(raw: RawMetadata) -> Result<Self, Self::Error> {
        let parse = |field: &'static str, value: &str| {
            Uuid::parse_str(value).map_err(|_| MetadataError::InvalidReference {
                field,
                value: value.to_string(),
            })
        };

        Ok(Self {
            session_id: parse("session_id", &raw.session_id)?,
            client_id: parse("client_id", &raw.client_id)?,
            therapist_id: parse("therapist_id", &raw.therapist_id)?,
        })
    }
}

/// Payload of a funds-captured event
#[derive(Debug, Clone)]
pub struct CapturePayload {
    pub payment_id: String,
    pub transfer_id: Option<String>,
    pub refs: SessionRefs,
}

/// Payload of a funds-failed / funds-canceled event
#[derive(Debug, Clone)]
pub struct FailurePayload {
    pub payment_id: String,
    pub reason: Option<String>,
    pub refs: SessionRefs,
}

/// Payload of an account-updated event
#[derive(Debug, Clone)]
pub struct AccountPayload {
    pub gateway_account_id: String,
    pub therapist_id: Uuid,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

/// Every inbound event the settlement core can see
#[derive(Debug, Clone)]
pub enum GatewayEventKind {
    /// Funds captured; drives completion + payout
    FundsCaptured(CapturePayload),
    /// Charge failed
    FundsFailed(FailurePayload),
    /// Charge canceled before capture
    FundsCanceled(FailurePayload),
    /// Therapist capability flags changed
    AccountUpdated(AccountPayload),
    /// Setup finished; acknowledged only
    SetupCompleted,
    /// Payment method attached; acknowledged only
    PaymentMethodAttached,
    /// Type tag outside the allow-list
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RawCaptureData {
    payment_id: String,
    #[serde(default)]
    transfer_id: Option<String>,
    metadata: RawMetadata,
}

#[derive(Debug, Deserialize)]
struct RawFailureData {
    payment_id: String,
    #[serde(default)]
    reason: Option<String>,
    metadata: RawMetadata,
}

#[derive(Debug, Deserialize)]
struct RawAccountData {
    gateway_account_id: String,
    therapist_id: String,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    details_submitted: bool,
}

impl EventEnvelope {
    /// Lift the raw envelope into a typed event.
    ///
    /// Fails only on malformed payloads for recognized event types; an
    /// unrecognized type tag is a successful `Unknown` classification.
    pub fn classify(&self) -> Result<GatewayEventKind, MetadataError> {
        match self.event_type.as_str() {
            constants::EVENT_FUNDS_CAPTURED => {
                let raw: RawCaptureData = serde_json::from_value(self.data.clone())
                    .map_err(|e| MetadataError::Malformed(e.to_string()))?;
                Ok(GatewayEventKind::FundsCaptured(CapturePayload {
                    payment_id: raw.payment_id,
                    transfer_id: raw.transfer_id,
                    refs: raw.metadata.try_into()?,
                }))
            }
            constants::EVENT_FUNDS_FAILED => {
                let raw: RawFailureData = serde_json::from_value(self.data.clone())
                    .map_err(|e| MetadataError::Malformed(e.to_string()))?;
                Ok(GatewayEventKind::FundsFailed(FailurePayload {
                    payment_id: raw.payment_id,
                    reason: raw.reason,
                    refs: raw.metadata.try_into()?,
                }))
            }
            constants::EVENT_FUNDS_CANCELED => {
                let raw: RawFailureData = serde_json::from_value(self.data.clone())
                    .map_err(|e| MetadataError::Malformed(e.to_string()))?;
                Ok(GatewayEventKind::FundsCanceled(FailurePayload {
                    payment_id: raw.payment_id,
                    reason: raw.reason,
                    refs: raw.metadata.try_into()?,
                }))
            }
            constants::EVENT_ACCOUNT_UPDATED => {
                let raw: RawAccountData = serde_json::from_value(self.data.clone())
                    .map_err(|e| MetadataError::Malformed(e.to_string()))?;
                let therapist_id = Uuid::parse_str(&raw.therapist_id).map_err(|_| {
                    MetadataError::InvalidReference {
                        field: "therapist_id",
                        value: raw.therapist_id.clone(),
                    }
                })?;
                Ok(GatewayEventKind::AccountUpdated(AccountPayload {
                    gateway_account_id: raw.gateway_account_id,
                    therapist_id,
                    charges_enabled: raw.charges_enabled,
                    payouts_enabled: raw.payouts_enabled,
                    details_submitted: raw.details_submitted,
                }))
            }
            constants::EVENT_SETUP_COMPLETED => Ok(GatewayEventKind::SetupCompleted),
            constants::EVENT_PAYMENT_METHOD_ATTACHED => Ok(GatewayEventKind::PaymentMethodAttached),
            _ => Ok(GatewayEventKind::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, data: Value) -> EventEnvelope {
        EventEnvelope {
            id: "evt_001".to_string(),
            event_type: event_type.to_string(),
            created: Some(1_700_000_000),
            data,
        }
    }

    fn metadata() -> Value {
        json!({
            "session_id": Uuid::new_v4().to_string(),
            "client_id": Uuid::new_v4().to_string(),
            "therapist_id": Uuid::new_v4().to_string(),
        })
    }

    #[test]
    fn test_classify_funds_captured() {
        let env = envelope(
            constants::EVENT_FUNDS_CAPTURED,
            json!({
                "payment_id": "pay_123",
                "transfer_id": "tr_456",
                "metadata": metadata(),
            }),
        );

        match env.classify().unwrap() {
            GatewayEventKind::FundsCaptured(p) => {
                assert_eq!(p.payment_id, "pay_123");
                assert_eq!(p.transfer_id.as_deref(), Some("tr_456"));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_classify_missing_metadata_field() {
        let env = envelope(
            constants::EVENT_FUNDS_CAPTURED,
            json!({
                "payment_id": "pay_123",
                "metadata": {
                    "session_id": Uuid::new_v4().to_string(),
                    "client_id": Uuid::new_v4().to_string(),
                },
            }),
        );

        assert!(matches!(env.classify(), Err(MetadataError::Malformed(_))));
    }

    #[test]
    fn test_classify_bad_identifier() {
        let env = envelope(
            constants::EVENT_FUNDS_FAILED,
            json!({
                "payment_id": "pay_123",
                "metadata": {
                    "session_id": "not-a-uuid",
                    "client_id": Uuid::new_v4().to_string(),
                    "therapist_id": Uuid::new_v4().to_string(),
                },
            }),
        );

        assert!(matches!(
            env.classify(),
            Err(MetadataError::InvalidReference {
                field: "session_id",
                ..
            })
        ));
    }

    #[test]
    fn test_classify_unknown_type() {
        let env = envelope("dispute.created", json!({}));
        assert!(matches!(env.classify(), Ok(GatewayEventKind::Unknown)));
    }

    #[test]
    fn test_classify_account_updated() {
        let therapist_id = Uuid::new_v4();
        let env = envelope(
            constants::EVENT_ACCOUNT_UPDATED,
            json!({
                "gateway_account_id": "acct_99",
                "therapist_id": therapist_id.to_string(),
                "charges_enabled": true,
                "payouts_enabled": false,
                "details_submitted": true,
            }),
        );

        match env.classify().unwrap() {
            GatewayEventKind::AccountUpdated(p) => {
                assert_eq!(p.therapist_id, therapist_id);
                assert!(p.charges_enabled);
                assert!(!p.payouts_enabled);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_envelope_round_trip() {
        let raw = json!({
            "id": "evt_42",
            "type": "setup.completed",
            "created": 1700000123,
            "data": {},
        });

        let env: EventEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.id, "evt_42");
        assert!(matches!(
            env.classify(),
            Ok(GatewayEventKind::SetupCompleted)
        ));
    }
}
