//! Slot allocator service
//!
//! Reserves an exclusive (therapist, start-time) booking. There is no
//! application-level locking here: the partial unique index on
//! `sessions (therapist_id, start_time)`, which ignores cancelled and
//! rescheduled rows, is the arbiter between concurrent reserve requests,
//! because the constraint check is atomic relative to the insert. The
//! loser of a race gets a `SlotTaken` conflict, an expected outcome
//! rather than a failure.
//!
//! A successful reservation also creates the session's payment record in
//! `pending` status, in the same transaction, with the full amount
//! out-of-pocket until the subsidy ledger rewrites the split.

use chrono::{DateTime, Utc};
use serena_core::{
    models::{PaymentRecord, Session},
    AppError, AppResult,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A validated booking request
#[derive(Debug, Clone)]
pub struct ReserveSession {
    pub therapist_id: Uuid,
    pub client_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price_cents: i64,
    pub sponsored_pool_id: Option<Uuid>,
}

/// Slot allocator
pub struct SlotAllocator {
    pool: Arc<PgPool>,
}

impl SlotAllocator {
    /// Create a new slot allocator
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn validate(request: &ReserveSession) -> AppResult<()> {
        if request.start_time >= request.end_time {
            return Err(AppError::Validation(
                "start_time must be before end_time".to_string(),
            ));
        }
        if request.price_cents < 0 {
            return Err(AppError::Validation(
                "price_cents must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Reserve a slot and create its pending payment record.
    ///
    /// # Errors
    ///
    /// - `Validation` when the request is malformed
    /// - `SlotTaken` when a non-cancelled session already holds the
    ///   (therapist, start-time) pair
    /// - `Database` / `Transaction` on any other persistence failure
    #[instrument(skip(self, request), fields(therapist_id = %request.therapist_id))]
    pub async fn reserve(&self, request: &ReserveSession) -> AppResult<(Session, PaymentRecord)> {
        Self::validate(request)?;

        let session = Session::new(
            request.therapist_id,
            request.client_id,
            request.start_time,
            request.end_time,
            request.price_cents,
            request.sponsored_pool_id,
        );
        let payment = PaymentRecord::new(session.id, request.price_cents);

        info!(
            "Reserving slot for therapist {} at {}: session {}",
            request.therapist_id, request.start_time, session.id
        );

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, therapist_id, client_id, start_time, end_time,
                status, price_cents, sponsored_pool_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id)
        .bind(session.therapist_id)
        .bind(session.client_id)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.status.to_string())
        .bind(session.price_cents)
        .bind(session.sponsored_pool_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                warn!(
                    "Slot collision for therapist {} at {}",
                    request.therapist_id, request.start_time
                );
                AppError::SlotTaken(format!(
                    "therapist {} at {}",
                    request.therapist_id, request.start_time
                ))
            }
            _ => {
                error!("Failed to create session: {}", e);
                AppError::Database(format!("Failed to create session: {}", e))
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO payment_records (
                id, session_id, amount_cents, subsidized_cents,
                out_of_pocket_cents, status
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(payment.id)
        .bind(payment.session_id)
        .bind(payment.amount_cents)
        .bind(payment.subsidized_cents)
        .bind(payment.out_of_pocket_cents)
        .bind(payment.status.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to create payment record: {}", e);
            AppError::Database(format!("Failed to create payment record: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!(
            "Reserved session {} for therapist {}",
            session.id, request.therapist_id
        );

        Ok((session, payment))
    }
}
