//! Gateway webhook ingress
//!
//! The single entry point for gateway-reported facts. Signature
//! verification runs over the raw body before anything is parsed; only
//! verified envelopes reach the settlement core. Duplicates, ignored
//! types, and malformed-metadata drops all acknowledge with 200 so the
//! gateway stops redelivering; errors return 5xx/4xx and the gateway
//! retries.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serena_core::{AppConfig, AppError};
use serena_gateway::{verify_signature, EventEnvelope};
use tracing::{instrument, warn};

use crate::handlers::Settlement;

/// Header carrying the gateway's HMAC signature
pub const SIGNATURE_HEADER: &str = "Gateway-Signature";

/// Register webhook routes
pub fn configure_webhooks(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhooks").route("/gateway", web::post().to(receive_gateway_event)));
}

/// Receive one signed gateway event
#[instrument(skip(settlement, config, request, body))]
pub async fn receive_gateway_event(
    settlement: web::Data<Settlement>,
    config: web::Data<AppConfig>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let signature = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::SignatureInvalid("missing signature header".to_string()))?;

    verify_signature(
        &body,
        signature,
        &config.gateway.webhook_secret,
        config.gateway.signature_tolerance_secs,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!("Rejected webhook delivery: {}", e);
        AppError::SignatureInvalid(e.to_string())
    })?;

    let envelope: EventEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidInput(format!("unparseable event envelope: {}", e)))?;

    let disposition = settlement.handle_event(&envelope).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "received": true,
        "disposition": disposition.as_str(),
    })))
}
