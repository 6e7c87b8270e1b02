//! Booking DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serena_core::models::{PaymentRecord, Session};
use serena_services::FundingSplit;
use uuid::Uuid;
use validator::Validate;

/// Booking request body
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub therapist_id: Uuid,
    pub client_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Session price in minor currency units
    #[validate(range(min = 0))]
    pub price_cents: i64,

    /// Sponsored pool to draw on, if the client belongs to one
    pub sponsored_pool_id: Option<Uuid>,
}

/// Booking response body
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub session_id: Uuid,
    pub status: String,
    pub price_cents: i64,
    pub subsidized_cents: i64,
    pub out_of_pocket_cents: i64,
    pub sponsored_pool_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BookingResponse {
    /// Assemble from the reserve + allocate results
    pub fn from_parts(session: &Session, payment: &PaymentRecord, split: &FundingSplit) -> Self {
        Self {
            session_id: session.id,
            status: session.status.to_string(),
            price_cents: payment.amount_cents,
            subsidized_cents: split.subsidized_cents,
            out_of_pocket_cents: split.out_of_pocket_cents,
            sponsored_pool_id: session.sponsored_pool_id,
            start_time: session.start_time,
            end_time: session.end_time,
        }
    }
}
