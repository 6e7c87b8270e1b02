//! API layer for Serena
//!
//! HTTP handlers for the three mutating surfaces of the settlement core:
//! booking, session lifecycle (confirm/complete/cancel/reschedule), and the
//! payment gateway webhook. Dashboard reads live elsewhere and never touch
//! the ledger.

pub mod dto;
pub mod handlers;

pub use handlers::{configure_bookings, configure_sessions, configure_webhooks, Settlement};
