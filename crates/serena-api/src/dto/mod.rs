//! Request/response DTOs for the Serena API

pub mod booking;
pub mod session;

pub use booking::{BookingResponse, CreateBookingRequest};
pub use session::{
    CompleteSessionRequest, CompletionResponse, ConfirmSessionRequest, RescheduleSessionRequest,
    RescheduleResponse, SessionResponse,
};
