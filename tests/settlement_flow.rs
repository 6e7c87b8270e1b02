//! End-to-end settlement tests against a real PostgreSQL instance.
//!
//! Run with DATABASE_URL pointing at a disposable database:
//!
//! ```text
//! DATABASE_URL=postgresql://localhost/serena_test cargo test -- --ignored
//! ```

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serena_core::config::SettlementConfig;
use serena_db::{
    create_pool, PgPaymentRepository, PgProcessedEventRepository, PgSessionRepository,
};
use serena_gateway::{
    constants, CaptureOutcome, EventEnvelope, GatewayError, PaymentGateway, RetryConfig,
    RetryExecutor,
};
use serena_services::{
    AutoCompletionScheduler, CompletionActor, CompletionOutcome, EventDisposition,
    PgSettlementProcessor, ReserveSession, SlotAllocator, SubsidyLedger,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Gateway stub: every capture succeeds without leaving the process
struct StubGateway;

impl StubGateway {
    fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn capture_payment(&self, _payment_id: &str) -> Result<CaptureOutcome, GatewayError> {
        Ok(CaptureOutcome::Captured {
            transfer_id: Some(format!("tr_{}", Uuid::new_v4())),
        })
    }
}

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let pool = create_pool(&url, Some(5)).await.expect("pool");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}

fn settlement(pool: &Arc<PgPool>, gateway: Arc<StubGateway>) -> Arc<PgSettlementProcessor<StubGateway>> {
    Arc::new(PgSettlementProcessor::new(
        Arc::clone(pool),
        gateway,
        Arc::new(PgSessionRepository::new((**pool).clone())),
        Arc::new(PgPaymentRepository::new((**pool).clone())),
        Arc::new(PgProcessedEventRepository::new((**pool).clone())),
        RetryExecutor::new(RetryConfig::default()),
        9000,
    ))
}

fn reserve_request(price_cents: i64, pool_id: Option<Uuid>) -> ReserveSession {
    let start = Utc::now() + Duration::days(7);
    ReserveSession {
        therapist_id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        start_time: start,
        end_time: start + Duration::hours(1),
        price_cents,
        sponsored_pool_id: pool_id,
    }
}

/// Booking that already ended long enough ago to be completable
fn past_reserve_request(hours_since_end: i64) -> ReserveSession {
    let end = Utc::now() - Duration::hours(hours_since_end);
    ReserveSession {
        therapist_id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        start_time: end - Duration::hours(1),
        end_time: end,
        price_cents: 10_000,
        sponsored_pool_id: None,
    }
}

async fn seed_sponsored_pool(pool: &PgPool, remaining_cents: i64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sponsored_pools (id, sponsor_name, allocated_cents, remaining_cents)
        VALUES ($1, 'Test Sponsor', $2, $2)
        "#,
    )
    .bind(id)
    .bind(remaining_cents)
    .execute(pool)
    .await
    .expect("seed pool");
    id
}

async fn seed_grant(pool: &PgPool, client_id: Uuid, remaining_cents: i64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO subsidy_grants (id, client_id, original_cents, remaining_cents)
        VALUES ($1, $2, $3, $3)
        "#,
    )
    .bind(id)
    .bind(client_id)
    .bind(remaining_cents)
    .execute(pool)
    .await
    .expect("seed grant");
    id
}

fn captured_envelope(request: &ReserveSession, session_id: Uuid) -> EventEnvelope {
    EventEnvelope {
        id: format!("evt_{}", Uuid::new_v4()),
        event_type: constants::EVENT_FUNDS_CAPTURED.to_string(),
        created: Some(Utc::now().timestamp()),
        data: serde_json::json!({
            "payment_id": format!("pay_{}", Uuid::new_v4()),
            "transfer_id": format!("tr_{}", Uuid::new_v4()),
            "metadata": {
                "session_id": session_id.to_string(),
                "client_id": request.client_id.to_string(),
                "therapist_id": request.therapist_id.to_string(),
            },
        }),
    }
}

async fn session_status(pool: &PgPool, session_id: Uuid) -> String {
    let (status,): (String,) = sqlx::query_as("SELECT status FROM sessions WHERE id = $1")
        .bind(session_id)
        .fetch_one(pool)
        .await
        .expect("session status");
    status
}

async fn payment_status(pool: &PgPool, session_id: Uuid) -> String {
    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM payment_records WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(pool)
            .await
            .expect("payment status");
    status
}

async fn payout_count(pool: &PgPool, session_id: Uuid) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM payout_records WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(pool)
            .await
            .expect("payout count");
    count
}

#[tokio::test]
#[ignore] // Requires database
async fn concurrent_reserves_are_exclusive() {
    let pool = Arc::new(test_pool().await);
    let allocator = Arc::new(SlotAllocator::new(Arc::clone(&pool)));

    let request = reserve_request(12_000, None);
    let a = {
        let allocator = Arc::clone(&allocator);
        let request = request.clone();
        tokio::spawn(async move { allocator.reserve(&request).await })
    };
    let b = {
        let allocator = Arc::clone(&allocator);
        let request = request.clone();
        tokio::spawn(async move { allocator.reserve(&request).await })
    };

    let results = [a.await.expect("join"), b.await.expect("join")];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(serena_core::AppError::SlotTaken(_))))
        .count();

    assert_eq!(successes, 1, "exactly one reserve must win");
    assert_eq!(conflicts, 1, "the loser must see a slot conflict");
}

#[tokio::test]
#[ignore] // Requires database
async fn allocation_follows_precedence_and_drains_sources() {
    let pool = Arc::new(test_pool().await);
    let allocator = SlotAllocator::new(Arc::clone(&pool));
    let ledger = SubsidyLedger::new(Arc::clone(&pool));

    let pool_id = seed_sponsored_pool(&pool, 6_000).await;
    let mut request = reserve_request(10_000, Some(pool_id));
    let grant_id = seed_grant(&pool, request.client_id, 3_000).await;
    request.sponsored_pool_id = Some(pool_id);

    let (session, _payment) = allocator.reserve(&request).await.expect("reserve");
    let split = ledger
        .allocate(request.client_id, session.id, Some(pool_id), 10_000)
        .await
        .expect("allocate");

    assert_eq!(split.subsidized_cents, 9_000);
    assert_eq!(split.out_of_pocket_cents, 1_000);

    let (pool_remaining,): (i64,) =
        sqlx::query_as("SELECT remaining_cents FROM sponsored_pools WHERE id = $1")
            .bind(pool_id)
            .fetch_one(&*pool)
            .await
            .expect("pool remaining");
    let (grant_remaining,): (i64,) =
        sqlx::query_as("SELECT remaining_cents FROM subsidy_grants WHERE id = $1")
            .bind(grant_id)
            .fetch_one(&*pool)
            .await
            .expect("grant remaining");

    assert_eq!(pool_remaining, 0);
    assert_eq!(grant_remaining, 0);

    let (subsidized, out_of_pocket): (i64, i64) = sqlx::query_as(
        "SELECT subsidized_cents, out_of_pocket_cents FROM payment_records WHERE session_id = $1",
    )
    .bind(session.id)
    .fetch_one(&*pool)
    .await
    .expect("payment split");

    assert_eq!(subsidized + out_of_pocket, 10_000);
}

#[tokio::test]
#[ignore] // Requires database
async fn duplicate_captured_event_is_idempotent() {
    let pool = Arc::new(test_pool().await);
    let allocator = SlotAllocator::new(Arc::clone(&pool));
    let processor = settlement(&pool, Arc::new(StubGateway::new()));

    let request = past_reserve_request(30);
    let (session, _payment) = allocator.reserve(&request).await.expect("reserve");
    processor
        .confirm_session(session.id, Some(&format!("pay_{}", Uuid::new_v4())))
        .await
        .expect("confirm");

    let envelope = captured_envelope(&request, session.id);

    let first = processor.handle_event(&envelope).await.expect("first delivery");
    assert_eq!(first, EventDisposition::Processed);

    let second = processor.handle_event(&envelope).await.expect("second delivery");
    assert_eq!(second, EventDisposition::AlreadyProcessed);

    assert_eq!(payout_count(&pool, session.id).await, 1);
    assert_eq!(session_status(&pool, session.id).await, "completed");
    assert_eq!(payment_status(&pool, session.id).await, "succeeded");
}

#[tokio::test]
#[ignore] // Requires database
async fn failure_event_never_regresses_settled_payment() {
    let pool = Arc::new(test_pool().await);
    let allocator = SlotAllocator::new(Arc::clone(&pool));
    let processor = settlement(&pool, Arc::new(StubGateway::new()));

    let request = past_reserve_request(30);
    let (session, _payment) = allocator.reserve(&request).await.expect("reserve");
    processor
        .confirm_session(session.id, Some(&format!("pay_{}", Uuid::new_v4())))
        .await
        .expect("confirm");

    processor
        .handle_event(&captured_envelope(&request, session.id))
        .await
        .expect("capture event");

    // A stale failure arrives after settlement; it must not regress anything.
    let failure = EventEnvelope {
        id: format!("evt_{}", Uuid::new_v4()),
        event_type: constants::EVENT_FUNDS_FAILED.to_string(),
        created: Some(Utc::now().timestamp()),
        data: serde_json::json!({
            "payment_id": "pay_stale",
            "reason": "card_declined",
            "metadata": {
                "session_id": session.id.to_string(),
                "client_id": request.client_id.to_string(),
                "therapist_id": request.therapist_id.to_string(),
            },
        }),
    };

    let disposition = processor.handle_event(&failure).await.expect("failure event");
    assert_eq!(disposition, EventDisposition::Processed);
    assert_eq!(payment_status(&pool, session.id).await, "succeeded");
    assert_eq!(session_status(&pool, session.id).await, "completed");
    assert_eq!(payout_count(&pool, session.id).await, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn settlement_is_atomic_when_payout_insert_fails() {
    let pool = Arc::new(test_pool().await);
    let allocator = SlotAllocator::new(Arc::clone(&pool));
    let processor = settlement(&pool, Arc::new(StubGateway::new()));

    let request = past_reserve_request(30);
    let (session, _payment) = allocator.reserve(&request).await.expect("reserve");
    processor
        .confirm_session(session.id, Some(&format!("pay_{}", Uuid::new_v4())))
        .await
        .expect("confirm");

    // Pre-seed a payout row so the settlement transaction's insert hits the
    // unique constraint and the whole transaction must roll back.
    sqlx::query(
        r#"
        INSERT INTO payout_records (id, session_id, therapist_id, amount_cents, status)
        VALUES ($1, $2, $3, 1, 'pending')
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session.id)
    .bind(request.therapist_id)
    .execute(&*pool)
    .await
    .expect("seed payout");

    let result = processor
        .complete_session(session.id, CompletionActor::Therapist(request.therapist_id))
        .await;

    assert!(result.is_err(), "settlement must fail on the payout conflict");
    // Nothing else from the transaction may have stuck.
    assert_eq!(session_status(&pool, session.id).await, "confirmed");
    assert_eq!(payment_status(&pool, session.id).await, "pending");
}

#[tokio::test]
#[ignore] // Requires database
async fn sweep_honors_grace_boundary_and_isolates_failures() {
    let pool = Arc::new(test_pool().await);
    let allocator = SlotAllocator::new(Arc::clone(&pool));
    let processor = settlement(&pool, Arc::new(StubGateway::new()));

    // Ended 25h ago: eligible. Ended 23h ago: not yet.
    let old_request = past_reserve_request(25);
    let (old_session, _) = allocator.reserve(&old_request).await.expect("reserve old");
    processor
        .confirm_session(old_session.id, Some(&format!("pay_{}", Uuid::new_v4())))
        .await
        .expect("confirm old");

    let fresh_request = past_reserve_request(23);
    let (fresh_session, _) = allocator.reserve(&fresh_request).await.expect("reserve fresh");
    processor
        .confirm_session(fresh_session.id, Some(&format!("pay_{}", Uuid::new_v4())))
        .await
        .expect("confirm fresh");

    let scheduler = AutoCompletionScheduler::new(
        Arc::clone(&processor),
        Arc::new(PgSessionRepository::new((*pool).clone())),
        &SettlementConfig::default(),
    );

    let report = scheduler.sweep(Utc::now()).await.expect("sweep");
    assert!(report.processed >= 1);

    assert_eq!(session_status(&pool, old_session.id).await, "completed");
    assert_eq!(session_status(&pool, fresh_session.id).await, "confirmed");

    match processor
        .complete_session(old_session.id, CompletionActor::System)
        .await
        .expect("re-complete")
    {
        CompletionOutcome::Denied(_) => {}
        CompletionOutcome::Completed { .. } => panic!("second completion must be denied"),
    }
}
