//! Booking and settlement services for Serena
//!
//! This crate contains the business logic that guards the platform's money:
//!
//! - `SlotAllocator` - exclusive (therapist, start-time) booking, with the
//!   database uniqueness constraint as the sole double-booking arbiter
//! - `SubsidyLedger` - splits a session's price across the sponsored pool,
//!   direct subsidy grants, and out-of-pocket, and decrements the consumed
//!   balances atomically
//! - `SettlementProcessor` - event-driven state machine that finalizes
//!   payments, completes sessions, and records payouts idempotently
//! - `AutoCompletionScheduler` - periodic sweep completing stale confirmed
//!   sessions through the same settlement path
//!
//! # Architecture
//!
//! Services own their transactions: every multi-row financial mutation runs
//! inside a single database transaction, and no transaction is ever held
//! open across a gateway call. Services are wrapped in Arc for safe sharing
//! across async tasks and instrumented with tracing.

pub mod auto_completion;
pub mod settlement;
pub mod slot_allocator;
pub mod subsidy_ledger;

pub use auto_completion::{AutoCompletionScheduler, SweepFailure, SweepReport};
pub use settlement::{
    CompletionActor, CompletionDenial, CompletionOutcome, EventDisposition, SettlementProcessor,
};
pub use slot_allocator::{ReserveSession, SlotAllocator};
pub use subsidy_ledger::{plan_allocation, FundingSplit, SubsidyLedger};

use serena_db::{PgPaymentRepository, PgProcessedEventRepository, PgSessionRepository};

/// Settlement processor wired to the PostgreSQL repositories
pub type PgSettlementProcessor<G> =
    SettlementProcessor<G, PgSessionRepository, PgPaymentRepository, PgProcessedEventRepository>;

/// Auto-completion scheduler wired to the PostgreSQL repositories
pub type PgAutoCompletionScheduler<G> =
    AutoCompletionScheduler<G, PgSessionRepository, PgPaymentRepository, PgProcessedEventRepository>;
