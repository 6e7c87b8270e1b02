//! Subsidy ledger service
//!
//! Splits a session's price across the available funding sources and
//! decrements the consumed balances. The precedence order is a business
//! rule, preserved exactly: (1) the sponsored pool, (2) direct subsidy
//! grants that have not expired, (3) out-of-pocket. Changing the order
//! changes who effectively subsidizes last.
//!
//! Running out of subsidy is never an error: whatever the sources cannot
//! cover simply becomes out-of-pocket.
//!
//! All arithmetic is integer cents. The decrement and the split written to
//! the payment record commit in one transaction; funding rows are locked
//! `FOR UPDATE`, and the database CHECK constraints (`remaining_cents >= 0`)
//! are the final arbiter when two bookings race on the same source.

use chrono::{DateTime, Utc};
use serena_core::{
    models::{SponsoredPool, SubsidyGrant},
    AppError, AppResult,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// How a session's price is funded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingSplit {
    /// Total covered by pool plus grants, in cents
    pub subsidized_cents: i64,
    /// Remainder the client pays, in cents
    pub out_of_pocket_cents: i64,
    /// Portion drawn from the sponsored pool, in cents
    pub pool_draw_cents: i64,
    /// Per-grant draws in the order they were applied
    pub grant_draws: Vec<(Uuid, i64)>,
}

impl FundingSplit {
    /// Sum drawn from grants, in cents
    pub fn grant_draw_cents(&self) -> i64 {
        self.grant_draws.iter().map(|(_, cents)| cents).sum()
    }
}

/// Compute the funding split for a session price.
///
/// Pure integer planning over balances the caller has already read (and,
/// in the transactional path, locked): pool first, then grants in the
/// given order, remainder out-of-pocket.
pub fn plan_allocation(
    total_cents: i64,
    pool_remaining_cents: Option<i64>,
    grants: &[(Uuid, i64)],
) -> FundingSplit {
    let mut need = total_cents.max(0);

    let pool_draw = pool_remaining_cents.unwrap_or(0).clamp(0, need);
    need -= pool_draw;

    let mut grant_draws = Vec::new();
    for &(grant_id, remaining) in grants {
        if need == 0 {
            break;
        }
        let draw = remaining.clamp(0, need);
        if draw > 0 {
            grant_draws.push((grant_id, draw));
            need -= draw;
        }
    }

    FundingSplit {
        subsidized_cents: total_cents.max(0) - need,
        out_of_pocket_cents: need,
        pool_draw_cents: pool_draw,
        grant_draws,
    }
}

/// Subsidy ledger
pub struct SubsidyLedger {
    pool: Arc<PgPool>,
}

/// Helper struct for pool row mapping
#[derive(Debug, sqlx::FromRow)]
struct PoolRow {
    id: Uuid,
    sponsor_name: String,
    allocated_cents: i64,
    remaining_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PoolRow> for SponsoredPool {
    fn from(row: PoolRow) -> Self {
        Self {
            id: row.id,
            sponsor_name: row.sponsor_name,
            allocated_cents: row.allocated_cents,
            remaining_cents: row.remaining_cents,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Helper struct for grant row mapping
#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: Uuid,
    client_id: Uuid,
    original_cents: i64,
    remaining_cents: i64,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GrantRow> for SubsidyGrant {
    fn from(row: GrantRow) -> Self {
        Self {
            id: row.id,
            client_id: row.client_id,
            original_cents: row.original_cents,
            remaining_cents: row.remaining_cents,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl SubsidyLedger {
    /// Create a new subsidy ledger
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Allocate funding for a booked session.
    ///
    /// Locks the funding rows, plans the split against the locked balances,
    /// decrements what was consumed, and writes the split onto the payment
    /// record plus the applied grant subsidy onto the session. Everything
    /// commits together or not at all.
    ///
    /// # Errors
    ///
    /// - `SponsoredPoolNotFound` when a pool id was given but doesn't exist
    /// - `PaymentNotFound` when the session has no payment record
    /// - `Database` / `Transaction` on persistence failure; a failed
    ///   guarded decrement aborts the whole allocation
    #[instrument(skip(self), fields(client_id = %client_id, session_id = %session_id))]
    pub async fn allocate(
        &self,
        client_id: Uuid,
        session_id: Uuid,
        sponsored_pool_id: Option<Uuid>,
        total_cents: i64,
    ) -> AppResult<FundingSplit> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        // Lock the pool row, if a pool is in play
        let sponsored_pool: Option<SponsoredPool> = match sponsored_pool_id {
            Some(pool_id) => {
                let row: Option<PoolRow> = sqlx::query_as(
                    r#"
                    SELECT id, sponsor_name, allocated_cents, remaining_cents,
                           created_at, updated_at
                    FROM sponsored_pools
                    WHERE id = $1
                    FOR UPDATE
                    "#,
                )
                .bind(pool_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to lock sponsored pool {}: {}", pool_id, e);
                    AppError::Database(format!("Failed to lock sponsored pool: {}", e))
                })?;

                Some(
                    row.map(Into::into)
                        .ok_or_else(|| AppError::SponsoredPoolNotFound(pool_id.to_string()))?,
                )
            }
            None => None,
        };

        // Lock eligible grants, soonest-expiring first so value is not
        // lost to expiry
        let grants: Vec<SubsidyGrant> = sqlx::query_as::<sqlx::Postgres, GrantRow>(
            r#"
            SELECT id, client_id, original_cents, remaining_cents,
                   expires_at, created_at, updated_at
            FROM subsidy_grants
            WHERE client_id = $1
                AND remaining_cents > 0
                AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY expires_at ASC NULLS LAST, created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(client_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to lock subsidy grants: {}", e);
            AppError::Database(format!("Failed to lock subsidy grants: {}", e))
        })?
        .into_iter()
        .map(Into::into)
        .collect();

        let balances: Vec<(Uuid, i64)> =
            grants.iter().map(|g| (g.id, g.remaining_cents)).collect();
        let split = plan_allocation(
            total_cents,
            sponsored_pool.as_ref().map(|p| p.remaining_cents),
            &balances,
        );

        // Decrement the pool. The guard clause cannot fail under the row
        // lock, but stays as a belt against plan/balance drift.
        if split.pool_draw_cents > 0 {
            let pool_id = sponsored_pool_id.ok_or_else(|| {
                AppError::Internal("pool draw planned without a pool".to_string())
            })?;
            let result = sqlx::query(
                r#"
                UPDATE sponsored_pools
                SET remaining_cents = remaining_cents - $2,
                    updated_at = NOW()
                WHERE id = $1 AND remaining_cents >= $2
                "#,
            )
            .bind(pool_id)
            .bind(split.pool_draw_cents)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to decrement sponsored pool: {}", e);
                AppError::Database(format!("Failed to decrement sponsored pool: {}", e))
            })?;

            if result.rows_affected() == 0 {
                error!(
                    "Sponsored pool {} balance moved under lock; aborting allocation",
                    pool_id
                );
                return Err(AppError::Transaction(
                    "sponsored pool balance changed during allocation".to_string(),
                ));
            }
        }

        // Decrement each consumed grant
        for &(grant_id, draw) in &split.grant_draws {
            let result = sqlx::query(
                r#"
                UPDATE subsidy_grants
                SET remaining_cents = remaining_cents - $2,
                    updated_at = NOW()
                WHERE id = $1 AND remaining_cents >= $2
                "#,
            )
            .bind(grant_id)
            .bind(draw)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to decrement subsidy grant {}: {}", grant_id, e);
                AppError::Database(format!("Failed to decrement subsidy grant: {}", e))
            })?;

            if result.rows_affected() == 0 {
                error!(
                    "Subsidy grant {} balance moved under lock; aborting allocation",
                    grant_id
                );
                return Err(AppError::Transaction(
                    "subsidy grant balance changed during allocation".to_string(),
                ));
            }
        }

        // Write the split onto the payment record
        let result = sqlx::query(
            r#"
            UPDATE payment_records
            SET subsidized_cents = $2,
                out_of_pocket_cents = $3,
                updated_at = NOW()
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(split.subsidized_cents)
        .bind(split.out_of_pocket_cents)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to write funding split: {}", e);
            AppError::Database(format!("Failed to write funding split: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::PaymentNotFound(session_id.to_string()));
        }

        // Record the grant-funded portion on the session for audit
        let grant_cents = split.grant_draw_cents();
        sqlx::query(
            r#"
            UPDATE sessions
            SET subsidy_applied_cents = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(if grant_cents > 0 { Some(grant_cents) } else { None })
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to record applied subsidy: {}", e);
            AppError::Database(format!("Failed to record applied subsidy: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!(
            "Allocated funding for session {}: subsidized={}, out_of_pocket={}",
            session_id, split.subsidized_cents, split.out_of_pocket_cents
        );

        Ok(split)
    }
}
