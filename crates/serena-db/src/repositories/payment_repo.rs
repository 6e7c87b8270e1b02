//! Payment record repository implementation

use chrono::{DateTime, Utc};
use serena_core::{
    models::{PaymentRecord, PaymentStatus},
    traits::PaymentRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Columns selected for every payment query
pub const PAYMENT_COLUMNS: &str = r#"
    id, session_id, amount_cents, subsidized_cents, out_of_pocket_cents,
    gateway_payment_id, status, captured_at, created_at, updated_at
"#;

/// PostgreSQL implementation of PaymentRepository
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    #[instrument(skip(self))]
    async fn find_by_session(&self, session_id: Uuid) -> AppResult<Option<PaymentRecord>> {
        debug!("Finding payment record for session: {}", session_id);

        let result = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error finding payment for session {}: {}",
                session_id, e
            );
            AppError::Database(format!("Failed to find payment record: {}", e))
        })?;

        Ok(result.map(Into::into))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub amount_cents: i64,
    pub subsidized_cents: i64,
    pub out_of_pocket_cents: i64,
    pub gateway_payment_id: Option<String>,
    pub status: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentRow> for PaymentRecord {
    fn from(row: PaymentRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            amount_cents: row.amount_cents,
            subsidized_cents: row.subsidized_cents,
            out_of_pocket_cents: row.out_of_pocket_cents,
            gateway_payment_id: row.gateway_payment_id,
            status: PaymentStatus::from_str(&row.status).unwrap_or(PaymentStatus::Pending),
            captured_at: row.captured_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
