//! Payment settlement processor
//!
//! The orchestrator of the settlement core. Consumes inbound gateway
//! events, enforces idempotency against at-least-once delivery, drives the
//! session state machine, and records payouts.
//!
//! # Idempotency
//!
//! Every event-driven mutation runs in a transaction whose first write
//! claims the event id in the processed-event ledger
//! (`INSERT ... ON CONFLICT DO NOTHING`). A duplicate delivery claims zero
//! rows and the transaction is rolled back untouched, so re-delivery can
//! never re-apply a payout or a status change. A cheap ledger lookup before
//! the transaction skips the common duplicate case without taking locks.
//!
//! # Ordering
//!
//! No delivery order is assumed. Mutations are keyed off the fact an event
//! reports, not its position in a stream, and payment statuses never
//! regress: a `succeeded` record stays settled no matter what arrives later.
//!
//! # Transactions vs gateway calls
//!
//! The capture-on-demand path calls the gateway *before* opening the
//! settlement transaction. Capture-then-persist is sequenced, never nested,
//! so no database locks are held across network I/O.

use chrono::Utc;
use serena_core::{
    models::{
        payout_amount_cents, CompletionSource, EventOutcome, PaymentRecord, PaymentStatus,
        PayoutRecord, ProcessedEvent, Session, SessionStatus,
    },
    traits::{PaymentRepository, ProcessedEventRepository, SessionRepository},
    AppError, AppResult,
};
use serena_db::{PaymentRow, SessionRow, PAYMENT_COLUMNS, SESSION_COLUMNS};
use serena_gateway::{
    event::{AccountPayload, CapturePayload, FailurePayload},
    CaptureOutcome, EventEnvelope, GatewayError, GatewayEventKind, PaymentGateway, RetryExecutor,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What happened to an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// The event mutated financial state
    Processed,
    /// A previous delivery already handled this event id
    AlreadyProcessed,
    /// Malformed metadata; acknowledged and dropped
    Discarded,
    /// Recognized (or unknown) type with nothing to do; acknowledged
    Ignored,
}

impl EventDisposition {
    /// Stable tag for API responses and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EventDisposition::Processed => "processed",
            EventDisposition::AlreadyProcessed => "already_processed",
            EventDisposition::Discarded => "discarded",
            EventDisposition::Ignored => "ignored",
        }
    }
}

/// Who is asking for a session to be completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionActor {
    /// The therapist, through the manual completion endpoint
    Therapist(Uuid),
    /// The auto-completion sweep
    System,
}

impl CompletionActor {
    fn source(&self) -> CompletionSource {
        match self {
            CompletionActor::Therapist(_) => CompletionSource::Therapist,
            CompletionActor::System => CompletionSource::System,
        }
    }
}

/// Why a completion request was denied.
///
/// Denials are expected outcomes surfaced to the caller, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionDenial {
    /// No such session, or it belongs to another therapist
    NotFoundOrUnauthorized,
    /// The session was already completed
    AlreadyCompleted,
    /// The session has not ended yet
    NotEnded,
    /// The session is not in a completable state
    NotConfirmed,
    /// The payment cannot be captured (missing reference, failed charge)
    PaymentUncapturable(String),
}

impl CompletionDenial {
    /// Stable reason tag for API responses
    pub fn reason(&self) -> &'static str {
        match self {
            CompletionDenial::NotFoundOrUnauthorized => "not_found_or_unauthorized",
            CompletionDenial::AlreadyCompleted => "already_completed",
            CompletionDenial::NotEnded => "session_not_ended",
            CompletionDenial::NotConfirmed => "session_not_confirmed",
            CompletionDenial::PaymentUncapturable(_) => "payment_uncapturable",
        }
    }
}

/// Result of a completion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Settlement finished; payout recorded
    Completed {
        /// Amount owed to the therapist in cents
        payout_cents: i64,
    },
    /// Denied for a business reason
    Denied(CompletionDenial),
}

/// Payment settlement processor
pub struct SettlementProcessor<G, S, P, E> {
    pool: Arc<PgPool>,
    gateway: Arc<G>,
    sessions: Arc<S>,
    payments: Arc<P>,
    events: Arc<E>,
    retry: RetryExecutor,
    payout_rate_bps: i64,
}

impl<G, S, P, E> SettlementProcessor<G, S, P, E>
where
    G: PaymentGateway,
    S: SessionRepository,
    P: PaymentRepository,
    E: ProcessedEventRepository,
{
    /// Create a new settlement processor
    pub fn new(
        pool: Arc<PgPool>,
        gateway: Arc<G>,
        sessions: Arc<S>,
        payments: Arc<P>,
        events: Arc<E>,
        retry: RetryExecutor,
        payout_rate_bps: i64,
    ) -> Self {
        Self {
            pool,
            gateway,
            sessions,
            payments,
            events,
            retry,
            payout_rate_bps,
        }
    }

    // ==================== Event handling ====================

    /// Handle one inbound gateway event.
    ///
    /// Always safe to call again with the same event: the idempotency gate
    /// turns duplicates into `AlreadyProcessed` without touching state.
    #[instrument(skip(self, envelope), fields(event_id = %envelope.id, event_type = %envelope.event_type))]
    pub async fn handle_event(&self, envelope: &EventEnvelope) -> AppResult<EventDisposition> {
        // Fast path for duplicates; the transactional claim below is the
        // authoritative gate.
        if self.events.contains(&envelope.id).await? {
            debug!("Event {} already processed", envelope.id);
            return Ok(EventDisposition::AlreadyProcessed);
        }

        let kind = match envelope.classify() {
            Ok(kind) => kind,
            Err(e) => {
                // Retrying will not fix malformed data; acknowledge and drop.
                warn!("Dropping event {} with bad metadata: {}", envelope.id, e);
                self.record_outcome(envelope, EventOutcome::Discarded).await?;
                return Ok(EventDisposition::Discarded);
            }
        };

        match kind {
            GatewayEventKind::FundsCaptured(payload) => {
                self.apply_capture_event(envelope, &payload).await
            }
            GatewayEventKind::FundsFailed(payload) => {
                self.apply_failure_event(envelope, &payload, PaymentStatus::Failed)
                    .await
            }
            GatewayEventKind::FundsCanceled(payload) => {
                self.apply_failure_event(envelope, &payload, PaymentStatus::Canceled)
                    .await
            }
            GatewayEventKind::AccountUpdated(payload) => {
                self.apply_account_event(envelope, &payload).await
            }
            GatewayEventKind::SetupCompleted | GatewayEventKind::PaymentMethodAttached => {
                debug!("Acknowledging {} event {}", envelope.event_type, envelope.id);
                self.record_outcome(envelope, EventOutcome::Ignored).await?;
                Ok(EventDisposition::Ignored)
            }
            GatewayEventKind::Unknown => {
                warn!(
                    "Unknown gateway event type '{}' for event {}",
                    envelope.event_type, envelope.id
                );
                self.record_outcome(envelope, EventOutcome::Ignored).await?;
                Ok(EventDisposition::Ignored)
            }
        }
    }

    /// Funds were captured: settle the payment, complete the session, and
    /// record the payout, all in one transaction.
    async fn apply_capture_event(
        &self,
        envelope: &EventEnvelope,
        payload: &CapturePayload,
    ) -> AppResult<EventDisposition> {
        let session_id = payload.refs.session_id;
        let mut tx = self.begin().await?;

        if !Self::claim_event(&mut tx, envelope, EventOutcome::Processed).await? {
            return Ok(EventDisposition::AlreadyProcessed);
        }

        let payment = Self::lock_payment(&mut tx, session_id)
            .await?
            // The event may have raced the booking commit; failing here
            // leaves the ledger unclaimed so redelivery can succeed.
            .ok_or_else(|| AppError::PaymentNotFound(session_id.to_string()))?;

        if payment.status.is_settled() {
            debug!(
                "Payment for session {} already settled; recording event only",
                session_id
            );
            self.commit(tx).await?;
            return Ok(EventDisposition::Processed);
        }

        let session = Self::lock_session(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if session.status == SessionStatus::Cancelled {
            // Money arrived for a cancelled booking. Record the captured
            // payment but leave completion and payout to the refund flow.
            warn!(
                "Captured funds for cancelled session {}; flagging for follow-up",
                session_id
            );
            Self::mark_payment_succeeded(&mut tx, payment.id, payload.payment_id.as_str()).await?;
            self.commit(tx).await?;
            return Ok(EventDisposition::Processed);
        }

        let payout_cents = self
            .settle(
                &mut tx,
                &session,
                &payment,
                Some(payload.payment_id.as_str()),
                payload.transfer_id.as_deref(),
                None,
            )
            .await?;

        self.commit(tx).await?;

        info!(
            "Settled session {} from event {}: payout {} cents",
            session_id, envelope.id, payout_cents
        );

        Ok(EventDisposition::Processed)
    }

    /// A charge failed or was canceled. The payment record is updated; the
    /// session is left untouched (a failed payment does not un-book a
    /// slot), and a settled payment never regresses.
    async fn apply_failure_event(
        &self,
        envelope: &EventEnvelope,
        payload: &FailurePayload,
        target: PaymentStatus,
    ) -> AppResult<EventDisposition> {
        let session_id = payload.refs.session_id;
        let mut tx = self.begin().await?;

        if !Self::claim_event(&mut tx, envelope, EventOutcome::Processed).await? {
            return Ok(EventDisposition::AlreadyProcessed);
        }

        let payment = Self::lock_payment(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(session_id.to_string()))?;

        if payment.status.is_settled() {
            warn!(
                "Ignoring {} for settled payment on session {} (status stays {})",
                envelope.event_type, session_id, payment.status
            );
        } else if payment.status == PaymentStatus::Pending {
            sqlx::query(
                r#"
                UPDATE payment_records
                SET status = $2, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(payment.id)
            .bind(target.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to update payment status: {}", e);
                AppError::Database(format!("Failed to update payment status: {}", e))
            })?;

            info!(
                "Payment for session {} marked {} ({})",
                session_id,
                target,
                payload.reason.as_deref().unwrap_or("no reason given")
            );
        } else {
            debug!(
                "Payment for session {} already {}; nothing to do",
                session_id, payment.status
            );
        }

        self.commit(tx).await?;
        Ok(EventDisposition::Processed)
    }

    /// Therapist capability flags changed at the gateway
    async fn apply_account_event(
        &self,
        envelope: &EventEnvelope,
        payload: &AccountPayload,
    ) -> AppResult<EventDisposition> {
        let mut tx = self.begin().await?;

        if !Self::claim_event(&mut tx, envelope, EventOutcome::Processed).await? {
            return Ok(EventDisposition::AlreadyProcessed);
        }

        sqlx::query(
            r#"
            INSERT INTO therapist_accounts (
                therapist_id, gateway_account_id,
                charges_enabled, payouts_enabled, details_submitted, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (therapist_id) DO UPDATE
            SET gateway_account_id = EXCLUDED.gateway_account_id,
                charges_enabled = EXCLUDED.charges_enabled,
                payouts_enabled = EXCLUDED.payouts_enabled,
                details_submitted = EXCLUDED.details_submitted,
                updated_at = NOW()
            "#,
        )
        .bind(payload.therapist_id)
        .bind(&payload.gateway_account_id)
        .bind(payload.charges_enabled)
        .bind(payload.payouts_enabled)
        .bind(payload.details_submitted)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to upsert therapist account: {}", e);
            AppError::Database(format!("Failed to upsert therapist account: {}", e))
        })?;

        self.commit(tx).await?;

        info!(
            "Updated capability flags for therapist {} (charges={}, payouts={})",
            payload.therapist_id, payload.charges_enabled, payload.payouts_enabled
        );

        Ok(EventDisposition::Processed)
    }

    // ==================== Booking flow transitions ====================

    /// Confirm a pending session once its payment authorization is in place.
    ///
    /// Idempotent: confirming an already-confirmed session is a no-op.
    #[instrument(skip(self, gateway_payment_id))]
    pub async fn confirm_session(
        &self,
        session_id: Uuid,
        gateway_payment_id: Option<&str>,
    ) -> AppResult<Session> {
        let mut tx = self.begin().await?;

        let mut session = Self::lock_session(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        match session.status {
            SessionStatus::Pending => {
                sqlx::query(
                    "UPDATE sessions SET status = 'confirmed', updated_at = NOW() WHERE id = $1",
                )
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to confirm session: {}", e);
                    AppError::Database(format!("Failed to confirm session: {}", e))
                })?;

                if let Some(payment_id) = gateway_payment_id {
                    sqlx::query(
                        r#"
                        UPDATE payment_records
                        SET gateway_payment_id = COALESCE(gateway_payment_id, $2),
                            updated_at = NOW()
                        WHERE session_id = $1
                        "#,
                    )
                    .bind(session_id)
                    .bind(payment_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        error!("Failed to attach gateway payment reference: {}", e);
                        AppError::Database(format!(
                            "Failed to attach gateway payment reference: {}",
                            e
                        ))
                    })?;
                }

                self.commit(tx).await?;
                session.status = SessionStatus::Confirmed;
                info!("Session {} confirmed", session_id);
                Ok(session)
            }
            SessionStatus::Confirmed | SessionStatus::Scheduled => {
                debug!("Session {} already confirmed", session_id);
                Ok(session)
            }
            other => Err(AppError::InvalidState(format!(
                "cannot confirm session {} in status {}",
                session_id, other
            ))),
        }
    }

    /// Complete a session and settle its payment.
    ///
    /// The shared path behind the manual completion endpoint and the
    /// auto-completion sweep. When the payment is still an uncaptured
    /// authorization, the gateway capture runs first, through the retry
    /// executor and outside any transaction; the settlement itself is one
    /// atomic transaction.
    #[instrument(skip(self))]
    pub async fn complete_session(
        &self,
        session_id: Uuid,
        actor: CompletionActor,
    ) -> AppResult<CompletionOutcome> {
        use CompletionDenial as Denial;

        // Phase 1: cheap pre-checks and the gateway capture, no locks held.
        let Some(session) = self.sessions.find_by_id(session_id).await? else {
            return Ok(CompletionOutcome::Denied(Denial::NotFoundOrUnauthorized));
        };

        if let CompletionActor::Therapist(therapist_id) = actor {
            if session.therapist_id != therapist_id {
                return Ok(CompletionOutcome::Denied(Denial::NotFoundOrUnauthorized));
            }
        }

        if session.status == SessionStatus::Completed {
            return Ok(CompletionOutcome::Denied(Denial::AlreadyCompleted));
        }
        if !session.status.can_complete() {
            return Ok(CompletionOutcome::Denied(Denial::NotConfirmed));
        }
        if session.end_time > Utc::now() {
            return Ok(CompletionOutcome::Denied(Denial::NotEnded));
        }

        let payment = self
            .payments
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(session_id.to_string()))?;

        let mut transfer_id: Option<String> = None;
        match payment.status {
            PaymentStatus::Pending => {
                let Some(gateway_payment_id) = payment.gateway_payment_id.clone() else {
                    return Ok(CompletionOutcome::Denied(Denial::PaymentUncapturable(
                        "no gateway payment reference on record".to_string(),
                    )));
                };

                let report = self
                    .retry
                    .execute(
                        "capture_payment",
                        || self.gateway.capture_payment(&gateway_payment_id),
                        GatewayError::is_transient,
                    )
                    .await
                    .map_err(|retry_err| {
                        warn!(
                            "Capture for session {} failed after {} attempts",
                            session_id, retry_err.attempts
                        );
                        AppError::from(retry_err.error)
                    })?;

                if let CaptureOutcome::Captured { transfer_id: t } = report.value {
                    transfer_id = t;
                }
            }
            status if status.is_settled() => {
                // Captured earlier through the event path; nothing to call.
            }
            status => {
                return Ok(CompletionOutcome::Denied(Denial::PaymentUncapturable(
                    format!("payment is {}", status),
                )));
            }
        }

        // Phase 2: atomic settlement, re-checking state under row locks
        // because an event delivery may have raced phase 1.
        let mut tx = self.begin().await?;

        let session = Self::lock_session(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if session.status == SessionStatus::Completed {
            return Ok(CompletionOutcome::Denied(Denial::AlreadyCompleted));
        }
        if !session.status.can_complete() {
            return Ok(CompletionOutcome::Denied(Denial::NotConfirmed));
        }

        let payment = Self::lock_payment(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(session_id.to_string()))?;

        if !payment.status.is_settled() && payment.status != PaymentStatus::Pending {
            return Ok(CompletionOutcome::Denied(Denial::PaymentUncapturable(
                format!("payment is {}", payment.status),
            )));
        }

        let payout_cents = self
            .settle(
                &mut tx,
                &session,
                &payment,
                None,
                transfer_id.as_deref(),
                Some(actor.source()),
            )
            .await?;

        self.commit(tx).await?;

        info!(
            "Session {} completed by {:?}: payout {} cents",
            session_id, actor, payout_cents
        );

        Ok(CompletionOutcome::Completed { payout_cents })
    }

    /// Cancel a pre-completed session.
    ///
    /// The slot is freed (the uniqueness index ignores cancelled sessions)
    /// and a still-pending payment record is canceled alongside. Cancelled
    /// sessions are retained for audit.
    #[instrument(skip(self))]
    pub async fn cancel_session(&self, session_id: Uuid) -> AppResult<Session> {
        self.close_out(session_id, SessionStatus::Cancelled).await
    }

    /// Mark a session superseded by a fresh booking at another time.
    ///
    /// The old slot is freed and the old payment record canceled if still
    /// pending; the replacement booking runs through the normal reserve
    /// path with a fresh payment record.
    #[instrument(skip(self))]
    pub async fn reschedule_session(&self, session_id: Uuid) -> AppResult<Session> {
        self.close_out(session_id, SessionStatus::Rescheduled).await
    }

    // ==================== Internals ====================

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    /// Claim an event id inside the current transaction. Returns false when
    /// another delivery already holds the claim.
    async fn claim_event(
        tx: &mut Transaction<'static, Postgres>,
        envelope: &EventEnvelope,
        outcome: EventOutcome,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, outcome, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&envelope.id)
        .bind(&envelope.event_type)
        .bind(outcome.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to claim event {}: {}", envelope.id, e);
            AppError::Database(format!("Failed to claim event: {}", e))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a non-mutating outcome through the ledger repository
    async fn record_outcome(&self, envelope: &EventEnvelope, outcome: EventOutcome) -> AppResult<()> {
        let record = ProcessedEvent {
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            outcome,
            processed_at: Utc::now(),
        };
        // A lost race here just means another delivery recorded it first.
        self.events.record(&record).await?;
        Ok(())
    }

    async fn lock_session(
        tx: &mut Transaction<'static, Postgres>,
        session_id: Uuid,
    ) -> AppResult<Option<Session>> {
        let row = sqlx::query_as::<sqlx::Postgres, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 FOR UPDATE"
        ))
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to lock session {}: {}", session_id, e);
            AppError::Database(format!("Failed to lock session: {}", e))
        })?;

        Ok(row.map(Into::into))
    }

    async fn lock_payment(
        tx: &mut Transaction<'static, Postgres>,
        session_id: Uuid,
    ) -> AppResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE session_id = $1 FOR UPDATE"
        ))
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to lock payment for session {}: {}", session_id, e);
            AppError::Database(format!("Failed to lock payment record: {}", e))
        })?;

        Ok(row.map(Into::into))
    }

    async fn mark_payment_succeeded(
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
        gateway_payment_id: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET status = 'succeeded',
                captured_at = COALESCE(captured_at, NOW()),
                gateway_payment_id = COALESCE(gateway_payment_id, $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(payment_id)
        .bind(gateway_payment_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to mark payment succeeded: {}", e);
            AppError::Database(format!("Failed to mark payment succeeded: {}", e))
        })?;

        Ok(())
    }

    /// The three settlement writes: payment succeeded, session completed,
    /// payout recorded. Caller owns the transaction; a failure in any write
    /// aborts all of them.
    async fn settle(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        session: &Session,
        payment: &PaymentRecord,
        gateway_payment_id: Option<&str>,
        transfer_id: Option<&str>,
        source: Option<CompletionSource>,
    ) -> AppResult<i64> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET status = 'succeeded',
                captured_at = COALESCE(captured_at, NOW()),
                gateway_payment_id = COALESCE(gateway_payment_id, $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(gateway_payment_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to settle payment record: {}", e);
            AppError::Database(format!("Failed to settle payment record: {}", e))
        })?;

        sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'completed',
                completion_source = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(source.map(|s| s.to_string()))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to complete session: {}", e);
            AppError::Database(format!("Failed to complete session: {}", e))
        })?;

        let payout = PayoutRecord::new(
            session.id,
            session.therapist_id,
            payout_amount_cents(payment.amount_cents, self.payout_rate_bps),
            transfer_id.map(str::to_string),
        );

        sqlx::query(
            r#"
            INSERT INTO payout_records (
                id, session_id, therapist_id, amount_cents,
                gateway_transfer_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(payout.id)
        .bind(payout.session_id)
        .bind(payout.therapist_id)
        .bind(payout.amount_cents)
        .bind(&payout.gateway_transfer_id)
        .bind(payout.status.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                error!(
                    "Payout already exists for session {}; aborting settlement",
                    session.id
                );
                AppError::AlreadyExists(format!("payout for session {}", session.id))
            }
            _ => {
                error!("Failed to record payout: {}", e);
                AppError::Database(format!("Failed to record payout: {}", e))
            }
        })?;

        Ok(payout.amount_cents)
    }

    async fn close_out(&self, session_id: Uuid, new_status: SessionStatus) -> AppResult<Session> {
        let mut tx = self.begin().await?;

        let mut session = Self::lock_session(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if !session.status.can_cancel() {
            return Err(AppError::InvalidState(format!(
                "cannot move session {} from {} to {}",
                session_id, session.status, new_status
            )));
        }

        sqlx::query("UPDATE sessions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(session_id)
            .bind(new_status.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to update session status: {}", e);
                AppError::Database(format!("Failed to update session status: {}", e))
            })?;

        let payment = Self::lock_payment(&mut tx, session_id).await?;
        if let Some(payment) = payment {
            if payment.status == PaymentStatus::Pending {
                sqlx::query(
                    r#"
                    UPDATE payment_records
                    SET status = 'canceled', updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(payment.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to cancel payment record: {}", e);
                    AppError::Database(format!("Failed to cancel payment record: {}", e))
                })?;
            }
        }

        self.commit(tx).await?;

        info!("Session {} moved to {}", session_id, new_status);
        session.status = new_status;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_reasons_are_stable() {
        assert_eq!(
            CompletionDenial::NotFoundOrUnauthorized.reason(),
            "not_found_or_unauthorized"
        );
        assert_eq!(
            CompletionDenial::AlreadyCompleted.reason(),
            "already_completed"
        );
        assert_eq!(CompletionDenial::NotEnded.reason(), "session_not_ended");
        assert_eq!(
            CompletionDenial::PaymentUncapturable("x".to_string()).reason(),
            "payment_uncapturable"
        );
    }

    #[test]
    fn test_actor_source_mapping() {
        assert_eq!(
            CompletionActor::Therapist(Uuid::new_v4()).source(),
            CompletionSource::Therapist
        );
        assert_eq!(CompletionActor::System.source(), CompletionSource::System);
    }
}
