//! Payment gateway integration for Serena
//!
//! This crate owns everything that touches the external payment gateway:
//!
//! - HTTP client for on-demand capture calls
//! - Inbound webhook event model (closed enum over an allow-list of types)
//! - Webhook signature verification
//! - Generic retry executor with exponential backoff and error
//!   classification, reused by every gateway-calling site
//!
//! # Architecture
//!
//! ```text
//!  Payment Gateway (webhooks)          Payment Gateway (REST)
//!         |                                    ^
//!         v                                    |
//!   verify_signature                   HttpPaymentGateway
//!         |                                    ^
//!         v                                    |
//!   EventEnvelope -> GatewayEventKind    RetryExecutor
//!         |                                    ^
//!         v                                    |
//!          Settlement services (serena-services)
//! ```

pub mod client;
pub mod event;
pub mod retry;
pub mod signature;

pub use client::{CaptureOutcome, GatewayError, HttpPaymentGateway, PaymentGateway};
pub use event::{EventEnvelope, GatewayEventKind, MetadataError, SessionRefs};
pub use retry::{RetryConfig, RetryError, RetryExecutor, RetryReport};
pub use signature::{verify_signature, SignatureError};

/// Gateway protocol constants
pub mod constants {
    /// Funds captured by the gateway
    pub const EVENT_FUNDS_CAPTURED: &str = "funds.captured";

    /// Charge failed at the gateway
    pub const EVENT_FUNDS_FAILED: &str = "funds.failed";

    /// Charge canceled before capture
    pub const EVENT_FUNDS_CANCELED: &str = "funds.canceled";

    /// Connected account capability flags changed
    pub const EVENT_ACCOUNT_UPDATED: &str = "account.updated";

    /// Payment setup finished (acknowledged, not acted on)
    pub const EVENT_SETUP_COMPLETED: &str = "setup.completed";

    /// Payment method attached (acknowledged, not acted on)
    pub const EVENT_PAYMENT_METHOD_ATTACHED: &str = "payment_method.attached";

    /// All event types the settlement core accepts
    pub const ALLOWED_EVENTS: &[&str] = &[
        EVENT_FUNDS_CAPTURED,
        EVENT_FUNDS_FAILED,
        EVENT_FUNDS_CANCELED,
        EVENT_ACCOUNT_UPDATED,
        EVENT_SETUP_COMPLETED,
        EVENT_PAYMENT_METHOD_ATTACHED,
    ];

    /// Gateway error code meaning a capture already happened
    pub const CODE_ALREADY_CAPTURED: &str = "charge_already_captured";
}
