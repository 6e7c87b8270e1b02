//! Session repository implementation
//!
//! Read paths over the sessions table. Status transitions happen inside the
//! settlement service's transactions, not here.

use chrono::{DateTime, Utc};
use serena_core::{
    models::{CompletionSource, Session, SessionStatus},
    traits::SessionRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Columns selected for every session query
pub const SESSION_COLUMNS: &str = r#"
    id, therapist_id, client_id, start_time, end_time,
    status, price_cents, sponsored_pool_id, subsidy_applied_cents,
    completion_source, created_at, updated_at
"#;

/// PostgreSQL implementation of SessionRepository
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Create a new session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Session>> {
        debug!("Finding session by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding session {}: {}", id, e);
            AppError::Database(format!("Failed to find session: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_auto_completable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Session>> {
        debug!("Finding confirmed sessions ended before {}", cutoff);

        let rows = sqlx::query_as::<sqlx::Postgres, SessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE status = 'confirmed'
                AND end_time <= $1
            ORDER BY end_time ASC
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding auto-completable sessions: {}", e);
            AppError::Database(format!("Failed to find auto-completable sessions: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub client_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub price_cents: i64,
    pub sponsored_pool_id: Option<Uuid>,
    pub subsidy_applied_cents: Option<i64>,
    pub completion_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            therapist_id: row.therapist_id,
            client_id: row.client_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status: SessionStatus::from_str(&row.status).unwrap_or(SessionStatus::Pending),
            price_cents: row.price_cents,
            sponsored_pool_id: row.sponsored_pool_id,
            subsidy_applied_cents: row.subsidy_applied_cents,
            completion_source: row
                .completion_source
                .as_deref()
                .and_then(CompletionSource::from_str),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_status_fallback() {
        let now = Utc::now();
        let row = SessionRow {
            id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            start_time: now,
            end_time: now,
            status: "garbled".to_string(),
            price_cents: 100,
            sponsored_pool_id: None,
            subsidy_applied_cents: None,
            completion_source: Some("system".to_string()),
            created_at: now,
            updated_at: now,
        };

        let session: Session = row.into();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.completion_source, Some(CompletionSource::System));
    }
}
