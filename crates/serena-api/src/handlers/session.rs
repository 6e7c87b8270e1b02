//! Session lifecycle handlers
//!
//! Confirm, complete, cancel, and reschedule. Completion denials are
//! business outcomes, returned as `{success: false, reason}` with a 200,
//! never as HTTP errors.

use actix_web::{web, HttpResponse};
use serena_core::{traits::SessionRepository, AppError};
use serena_db::PgSessionRepository;
use serena_services::{CompletionActor, ReserveSession, SlotAllocator, SubsidyLedger};
use tracing::instrument;
use uuid::Uuid;

use crate::dto::{
    CompleteSessionRequest, CompletionResponse, ConfirmSessionRequest, RescheduleResponse,
    RescheduleSessionRequest, SessionResponse,
};
use crate::handlers::Settlement;

/// Register session lifecycle routes
pub fn configure_sessions(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sessions")
            .route("/{id}/confirm", web::post().to(confirm_session))
            .route("/{id}/complete", web::post().to(complete_session))
            .route("/{id}/cancel", web::post().to(cancel_session))
            .route("/{id}/reschedule", web::post().to(reschedule_session)),
    );
}

/// Confirm a pending session once checkout placed the authorization hold
#[instrument(skip(settlement, request))]
pub async fn confirm_session(
    settlement: web::Data<Settlement>,
    path: web::Path<Uuid>,
    request: Option<web::Json<ConfirmSessionRequest>>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let gateway_payment_id = request
        .map(|r| r.into_inner())
        .unwrap_or_default()
        .gateway_payment_id;

    let session = settlement
        .confirm_session(session_id, gateway_payment_id.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(SessionResponse::from(&session)))
}

/// Manually complete a session as its therapist
#[instrument(skip(settlement, request))]
pub async fn complete_session(
    settlement: web::Data<Settlement>,
    path: web::Path<Uuid>,
    request: web::Json<CompleteSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();

    let outcome = settlement
        .complete_session(session_id, CompletionActor::Therapist(request.therapist_id))
        .await?;

    Ok(HttpResponse::Ok().json(CompletionResponse::from(outcome)))
}

/// Cancel a pre-completed session
#[instrument(skip(settlement))]
pub async fn cancel_session(
    settlement: web::Data<Settlement>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session = settlement.cancel_session(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(SessionResponse::from(&session)))
}

/// Move a session to a new slot.
///
/// The new slot is reserved first (a collision leaves the old booking
/// untouched), then the old session is marked rescheduled and the new one
/// funded with a fresh allocation.
#[instrument(skip(settlement, allocator, ledger, sessions, request))]
pub async fn reschedule_session(
    settlement: web::Data<Settlement>,
    allocator: web::Data<SlotAllocator>,
    ledger: web::Data<SubsidyLedger>,
    sessions: web::Data<PgSessionRepository>,
    path: web::Path<Uuid>,
    request: web::Json<RescheduleSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let old_session_id = path.into_inner();

    let old = sessions
        .find_by_id(old_session_id)
        .await?
        .ok_or_else(|| AppError::SessionNotFound(old_session_id.to_string()))?;

    if !old.status.can_cancel() {
        return Err(AppError::InvalidState(format!(
            "cannot reschedule session {} in status {}",
            old_session_id, old.status
        )));
    }

    let reserve = ReserveSession {
        therapist_id: old.therapist_id,
        client_id: old.client_id,
        start_time: request.start_time,
        end_time: request.end_time,
        price_cents: old.price_cents,
        sponsored_pool_id: old.sponsored_pool_id,
    };

    let (new_session, _payment) = allocator.reserve(&reserve).await?;

    settlement.reschedule_session(old_session_id).await?;

    let split = ledger
        .allocate(
            old.client_id,
            new_session.id,
            old.sponsored_pool_id,
            old.price_cents,
        )
        .await?;

    Ok(HttpResponse::Ok().json(RescheduleResponse {
        old_session_id,
        new_session_id: new_session.id,
        subsidized_cents: split.subsidized_cents,
        out_of_pocket_cents: split.out_of_pocket_cents,
    }))
}
