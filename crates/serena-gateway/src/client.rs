//! HTTP client for the external payment gateway
//!
//! Used for the capture-on-demand path: when a therapist confirms a session
//! whose payment is still an uncaptured authorization, the settlement
//! service captures the hold through this client before persisting the
//! settlement. The gateway treats capture idempotently; an
//! already-captured charge is reported as success here too.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serena_core::AppError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::constants::CODE_ALREADY_CAPTURED;

/// Errors from the payment gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: status {status}")]
    Http { status: u16, body: String },

    #[error("Gateway error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Whether a retry could succeed.
    ///
    /// Network trouble, timeouts, and 5xx responses are transient; anything
    /// the gateway rejected deliberately (4xx, typed API errors) is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Connection(_) | GatewayError::Timeout => true,
            GatewayError::Http { status, .. } => *status >= 500,
            GatewayError::Api { .. } | GatewayError::Parse(_) => false,
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        if err.is_transient() {
            AppError::GatewayTransient(err.to_string())
        } else {
            AppError::GatewayTerminal(err.to_string())
        }
    }
}

/// Result of a capture call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Funds were captured by this call
    Captured {
        /// Transfer reference, when the gateway creates one synchronously
        transfer_id: Option<String>,
    },
    /// A previous call (or the gateway itself) already captured the charge
    AlreadyCaptured,
}

/// Payment gateway abstraction
///
/// One method is all the settlement core needs; everything else the
/// gateway reports arrives through webhook events.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Capture an authorized payment
    async fn capture_payment(&self, payment_id: &str) -> Result<CaptureOutcome, GatewayError>;
}

/// Production gateway client over HTTPS
pub struct HttpPaymentGateway {
    http_client: Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    status: String,
    transfer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

impl HttpPaymentGateway {
    /// Create a new gateway client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Gateway API base URL
    /// * `secret_key` - API secret used as bearer token
    /// * `timeout_ms` - Per-request timeout in milliseconds
    pub fn new(base_url: &str, secret_key: &str, timeout_ms: u64) -> Result<Self, GatewayError> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(20)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn capture_payment(&self, payment_id: &str) -> Result<CaptureOutcome, GatewayError> {
        let url = format!("{}/v1/payments/{}/capture", self.base_url, payment_id);
        debug!("Capturing payment {}", payment_id);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        if status.is_success() {
            let parsed: CaptureResponse =
                serde_json::from_str(&body).map_err(|e| GatewayError::Parse(e.to_string()))?;

            return match parsed.status.as_str() {
                "succeeded" => Ok(CaptureOutcome::Captured {
                    transfer_id: parsed.transfer_id,
                }),
                other => Err(GatewayError::Api {
                    code: "unexpected_status".to_string(),
                    message: format!("capture returned status {}", other),
                }),
            };
        }

        if status.is_client_error() {
            if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(&body) {
                if envelope.error.code == CODE_ALREADY_CAPTURED {
                    debug!("Payment {} was already captured", payment_id);
                    return Ok(CaptureOutcome::AlreadyCaptured);
                }
                warn!(
                    "Gateway rejected capture of {}: {} ({})",
                    payment_id, envelope.error.message, envelope.error.code
                );
                return Err(GatewayError::Api {
                    code: envelope.error.code,
                    message: envelope.error.message,
                });
            }
        }

        Err(GatewayError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Connection("reset".to_string()).is_transient());
        assert!(GatewayError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());

        assert!(!GatewayError::Http {
            status: 404,
            body: String::new()
        }
        .is_transient());
        assert!(!GatewayError::Api {
            code: "card_declined".to_string(),
            message: String::new()
        }
        .is_transient());
        assert!(!GatewayError::Parse("bad json".to_string()).is_transient());
    }

    #[test]
    fn test_app_error_mapping() {
        let transient: AppError = GatewayError::Timeout.into();
        assert!(matches!(transient, AppError::GatewayTransient(_)));

        let terminal: AppError = GatewayError::Api {
            code: "card_declined".to_string(),
            message: "declined".to_string(),
        }
        .into();
        assert!(matches!(terminal, AppError::GatewayTerminal(_)));
    }
}
