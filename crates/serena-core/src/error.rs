//! Unified error handling for Serena
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the application, with automatic HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
///
/// Note that a subsidy source running dry is NOT an error anywhere in this
/// taxonomy: partial funding always resolves to out-of-pocket.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Business Logic Errors ====================
    #[error("Slot already taken: {0}")]
    SlotTaken(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Payment record not found for session: {0}")]
    PaymentNotFound(String),

    #[error("Therapist not found: {0}")]
    TherapistNotFound(String),

    #[error("Sponsored pool not found: {0}")]
    SponsoredPoolNotFound(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ==================== Gateway Errors ====================
    #[error("Transient gateway error: {0}")]
    GatewayTransient(String),

    #[error("Terminal gateway error: {0}")]
    GatewayTerminal(String),

    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_)
            | AppError::InvalidInput(_)
            | AppError::MissingField(_)
            | AppError::SignatureInvalid(_) => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::SessionNotFound(_)
            | AppError::PaymentNotFound(_)
            | AppError::TherapistNotFound(_)
            | AppError::SponsoredPoolNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::SlotTaken(_)
            | AppError::Conflict(_)
            | AppError::AlreadyExists(_)
            | AppError::InvalidState(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            AppError::GatewayTransient(_) | AppError::GatewayTerminal(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::SlotTaken(_) => "slot_taken",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::PaymentNotFound(_) => "payment_not_found",
            AppError::TherapistNotFound(_) => "therapist_not_found",
            AppError::SponsoredPoolNotFound(_) => "sponsored_pool_not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::GatewayTransient(_) => "gateway_transient",
            AppError::GatewayTerminal(_) => "gateway_terminal",
            AppError::SignatureInvalid(_) => "signature_invalid",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether retrying the failed operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::GatewayTransient(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::SlotTaken("t1@10:00".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::SessionNotFound("abc".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Validation("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::GatewayTransient("timeout".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::SlotTaken("x".to_string()).error_code(),
            "slot_taken"
        );
        assert_eq!(
            AppError::GatewayTerminal("denied".to_string()).error_code(),
            "gateway_terminal"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::GatewayTransient("503".to_string()).is_transient());
        assert!(!AppError::GatewayTerminal("401".to_string()).is_transient());
        assert!(!AppError::Database("down".to_string()).is_transient());
    }
}
