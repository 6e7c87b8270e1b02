//! Session lifecycle DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serena_core::models::Session;
use serena_services::{CompletionDenial, CompletionOutcome};
use uuid::Uuid;

/// Confirm request body
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmSessionRequest {
    /// Gateway payment reference created during checkout
    pub gateway_payment_id: Option<String>,
}

/// Manual completion request body
#[derive(Debug, Deserialize)]
pub struct CompleteSessionRequest {
    /// Therapist asking for completion; must own the session
    pub therapist_id: Uuid,
}

/// Completion response body: success, or a business denial with a reason
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_cents: Option<i64>,
}

impl From<CompletionOutcome> for CompletionResponse {
    fn from(outcome: CompletionOutcome) -> Self {
        match outcome {
            CompletionOutcome::Completed { payout_cents } => Self {
                success: true,
                reason: None,
                payout_cents: Some(payout_cents),
            },
            CompletionOutcome::Denied(denial) => Self {
                success: false,
                reason: Some(denial_reason(&denial)),
                payout_cents: None,
            },
        }
    }
}

fn denial_reason(denial: &CompletionDenial) -> String {
    match denial {
        CompletionDenial::PaymentUncapturable(detail) => {
            format!("{}: {}", denial.reason(), detail)
        }
        other => other.reason().to_string(),
    }
}

/// Reschedule request body
#[derive(Debug, Deserialize)]
pub struct RescheduleSessionRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Reschedule response body
#[derive(Debug, Serialize)]
pub struct RescheduleResponse {
    pub old_session_id: Uuid,
    pub new_session_id: Uuid,
    pub subsidized_cents: i64,
    pub out_of_pocket_cents: i64,
}

/// Generic session summary
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub therapist_id: Uuid,
    pub client_id: Uuid,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price_cents: i64,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            therapist_id: session.therapist_id,
            client_id: session.client_id,
            status: session.status.to_string(),
            start_time: session.start_time,
            end_time: session.end_time,
            price_cents: session.price_cents,
        }
    }
}
