//! Serena Database Layer
//!
//! This crate provides PostgreSQL database access and repository
//! implementations for the Serena booking and settlement backend:
//!
//! - Connection pool management with sqlx
//! - Repository implementations for sessions, payments, and the
//!   processed-event idempotency ledger
//! - Row mapping helpers shared with the transactional services

pub mod pool;
pub mod repositories;

pub use pool::create_pool;
pub use repositories::*;

// Re-export commonly used types
pub use serena_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};
