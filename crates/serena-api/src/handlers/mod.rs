//! HTTP handlers for Serena

pub mod booking;
pub mod session;
pub mod webhook;

pub use booking::configure_bookings;
pub use session::configure_sessions;
pub use webhook::configure_webhooks;

use serena_gateway::HttpPaymentGateway;
use serena_services::PgSettlementProcessor;

/// The settlement processor as wired in production
pub type Settlement = PgSettlementProcessor<HttpPaymentGateway>;
