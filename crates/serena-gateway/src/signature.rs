//! Webhook signature verification
//!
//! The gateway signs every delivery with an HMAC-SHA256 over
//! `"{timestamp}.{body}"` and sends the result in a header shaped like
//! `t=<unix-ts>,v1=<hex-digest>`. Verification happens at the webhook edge,
//! before any event reaches the settlement core. The timestamp tolerance
//! bounds replay of captured deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature verification failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature header missing timestamp")]
    MissingTimestamp,

    #[error("Signature header missing v1 digest")]
    MissingDigest,

    #[error("Signature header malformed: {0}")]
    Malformed(String),

    #[error("Signed timestamp outside tolerance window")]
    Expired,

    #[error("Signature mismatch")]
    Mismatch,
}

/// Verify a signed webhook delivery.
///
/// # Arguments
///
/// * `payload` - Raw request body bytes, exactly as delivered
/// * `header` - The signature header (`t=...,v1=...`)
/// * `secret` - Webhook signing secret
/// * `tolerance_secs` - Maximum allowed age of the signed timestamp
/// * `now_unix` - Current unix time, injected so callers control the clock
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut digest: Option<&str> = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse()
                        .map_err(|_| SignatureError::Malformed(format!("bad timestamp: {}", value)))?,
                );
            }
            Some(("v1", value)) => digest = Some(value),
            // Older scheme versions and unknown keys are skipped
            Some(_) => {}
            None => {
                return Err(SignatureError::Malformed(format!(
                    "expected key=value, got: {}",
                    part
                )))
            }
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    let digest = digest.ok_or(SignatureError::MissingDigest)?;

    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let digest_bytes =
        hex::decode(digest).map_err(|_| SignatureError::Malformed("digest not hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Malformed("invalid secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Constant-time comparison via the Mac verifier
    mac.verify_slice(&digest_bytes)
        .map_err(|_| SignatureError::Mismatch)
}

/// Compute the hex signature for a payload; used by tests and tooling
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn header_for(payload: &[u8], timestamp: i64) -> String {
        format!("t={},v1={}", timestamp, sign_payload(payload, SECRET, timestamp))
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"id":"evt_1","type":"funds.captured"}"#;
        let header = header_for(payload, 1_700_000_000);

        assert_eq!(
            verify_signature(payload, &header, SECRET, 300, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_payload() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = header_for(payload, 1_700_000_000);

        assert_eq!(
            verify_signature(br#"{"id":"evt_2"}"#, &header, SECRET, 300, 1_700_000_100),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let payload = b"body";
        let header = header_for(payload, 1_700_000_000);

        assert_eq!(
            verify_signature(payload, &header, "whsec_other", 300, 1_700_000_100),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_expired_timestamp() {
        let payload = b"body";
        let header = header_for(payload, 1_700_000_000);

        assert_eq!(
            verify_signature(payload, &header, SECRET, 300, 1_700_000_301),
            Err(SignatureError::Expired)
        );
        // Inside the window is fine
        assert_eq!(
            verify_signature(payload, &header, SECRET, 300, 1_700_000_300),
            Ok(())
        );
    }

    #[test]
    fn test_missing_parts() {
        let payload = b"body";
        assert_eq!(
            verify_signature(payload, "v1=abcd", SECRET, 300, 0),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_signature(payload, "t=100", SECRET, 300, 100),
            Err(SignatureError::MissingDigest)
        );
    }
}
