//! Common traits for repositories
//!
//! Defines abstractions for database access used by the settlement services.
//! Multi-row financial mutations are not expressed here: those run inside a
//! single transaction owned by the service, so only read paths and
//! single-row ledger operations cross this boundary.

use crate::error::AppError;
use crate::models::{PaymentRecord, ProcessedEvent, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Session read access
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Find session by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// Sessions still `confirmed` whose end time passed the given cutoff,
    /// oldest first, bounded by `limit`
    async fn find_auto_completable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Session>, AppError>;
}

/// Payment record read access
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Find the payment record belonging to a session
    async fn find_by_session(&self, session_id: Uuid) -> Result<Option<PaymentRecord>, AppError>;
}

/// Idempotency ledger for external gateway events
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    /// Whether an event id has already been handled
    async fn contains(&self, event_id: &str) -> Result<bool, AppError>;

    /// Record a handled event. Returns false when the id was already
    /// present (a concurrent delivery won the race).
    async fn record(&self, event: &ProcessedEvent) -> Result<bool, AppError>;
}
