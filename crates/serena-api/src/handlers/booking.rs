//! Booking handlers
//!
//! `POST /api/v1/bookings` reserves a slot and allocates subsidy funding.
//! A slot collision surfaces as 409 with the `slot_taken` code, which the
//! UI renders as "slot no longer available".

use actix_web::{web, HttpResponse};
use serena_core::{models::TherapistAccount, AppError};
use serena_services::{ReserveSession, SlotAllocator, SubsidyLedger};
use sqlx::PgPool;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::dto::{BookingResponse, CreateBookingRequest};
use crate::handlers::Settlement;

/// Register booking routes
pub fn configure_bookings(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/bookings").route("", web::post().to(create_booking)));
}

#[derive(Debug, sqlx::FromRow)]
struct TherapistAccountRow {
    therapist_id: Uuid,
    gateway_account_id: String,
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<TherapistAccountRow> for TherapistAccount {
    fn from(row: TherapistAccountRow) -> Self {
        Self {
            therapist_id: row.therapist_id,
            gateway_account_id: row.gateway_account_id,
            charges_enabled: row.charges_enabled,
            payouts_enabled: row.payouts_enabled,
            details_submitted: row.details_submitted,
            updated_at: row.updated_at,
        }
    }
}

/// Create a booking: reserve the slot, then allocate subsidy funding
#[instrument(skip(pool, allocator, ledger, settlement, request))]
pub async fn create_booking(
    pool: web::Data<PgPool>,
    allocator: web::Data<SlotAllocator>,
    ledger: web::Data<SubsidyLedger>,
    settlement: web::Data<Settlement>,
    request: web::Json<CreateBookingRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    request.validate()?;

    // Gate on the therapist's gateway capability flags when we have them;
    // a therapist mid-onboarding simply has no row yet.
    let account: Option<TherapistAccountRow> = sqlx::query_as(
        r#"
        SELECT therapist_id, gateway_account_id,
               charges_enabled, payouts_enabled, details_submitted, updated_at
        FROM therapist_accounts
        WHERE therapist_id = $1
        "#,
    )
    .bind(request.therapist_id)
    .fetch_optional(pool.get_ref())
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    if let Some(account) = account {
        let account: TherapistAccount = account.into();
        if !account.can_take_bookings() {
            return Err(AppError::Conflict(format!(
                "therapist {} cannot take bookings right now",
                request.therapist_id
            )));
        }
    }

    // Validate the pool reference up front so a booking is never left
    // half-allocated over a bad request.
    if let Some(pool_id) = request.sponsored_pool_id {
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM sponsored_pools WHERE id = $1")
                .bind(pool_id)
                .fetch_optional(pool.get_ref())
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

        if exists.is_none() {
            return Err(AppError::SponsoredPoolNotFound(pool_id.to_string()));
        }
    }

    let reserve = ReserveSession {
        therapist_id: request.therapist_id,
        client_id: request.client_id,
        start_time: request.start_time,
        end_time: request.end_time,
        price_cents: request.price_cents,
        sponsored_pool_id: request.sponsored_pool_id,
    };

    let (session, payment) = allocator.reserve(&reserve).await?;

    let split = match ledger
        .allocate(
            request.client_id,
            session.id,
            request.sponsored_pool_id,
            request.price_cents,
        )
        .await
    {
        Ok(split) => split,
        Err(e) => {
            // The slot is booked but unfunded; release it so the client
            // can retry cleanly.
            warn!(
                "Funding allocation failed for session {}; cancelling reservation: {}",
                session.id, e
            );
            if let Err(cancel_err) = settlement.cancel_session(session.id).await {
                warn!(
                    "Failed to release unfunded session {}: {}",
                    session.id, cancel_err
                );
            }
            return Err(e);
        }
    };

    Ok(HttpResponse::Created().json(BookingResponse::from_parts(&session, &payment, &split)))
}
