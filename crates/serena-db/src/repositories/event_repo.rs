//! Processed-event ledger repository implementation
//!
//! The primary key on event_id resolves races between concurrent webhook
//! deliveries: the first insert wins, later ones see zero rows affected.

use serena_core::{
    models::ProcessedEvent,
    traits::ProcessedEventRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of ProcessedEventRepository
pub struct PgProcessedEventRepository {
    pool: PgPool,
}

impl PgProcessedEventRepository {
    /// Create a new processed-event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventRepository for PgProcessedEventRepository {
    #[instrument(skip(self))]
    async fn contains(&self, event_id: &str) -> AppResult<bool> {
        let result: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error checking event {}: {}", event_id, e);
            AppError::Database(format!("Failed to check processed event: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self, event))]
    async fn record(&self, event: &ProcessedEvent) -> AppResult<bool> {
        debug!("Recording event {} as {}", event.event_id, event.outcome);

        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, outcome, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.outcome.to_string())
        .bind(event.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error recording event {}: {}", event.event_id, e);
            AppError::Database(format!("Failed to record processed event: {}", e))
        })?;

        Ok(result.rows_affected() > 0)
    }
}
