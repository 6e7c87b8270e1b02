//! Repository implementations for Serena

pub mod event_repo;
pub mod payment_repo;
pub mod session_repo;

pub use event_repo::PgProcessedEventRepository;
pub use payment_repo::{PaymentRow, PgPaymentRepository, PAYMENT_COLUMNS};
pub use session_repo::{PgSessionRepository, SessionRow, SESSION_COLUMNS};
