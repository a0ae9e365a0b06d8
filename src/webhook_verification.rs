//! # Webhook Signature Verification
//!
//! HMAC-SHA256 verification for calendar/agent deliveries and transcoding deliveries, with
//! constant-time comparison.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const CALENDAR_SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TRANSCODING_SIGNATURE_HEADER: &str = "transcoding-signature";

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {header}")]
    InvalidSignatureFormat { header: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Timestamp too old: {seconds}s old, max allowed: {max_seconds}s")]
    TimestampTooOld { seconds: u64, max_seconds: u64 },

    #[error("Timestamp too far in future: {seconds}s in future, max allowed: {max_seconds}s")]
    TimestampTooFuture { seconds: u64, max_seconds: u64 },

    #[error("Webhook verification not configured for source: {source_name}")]
    NotConfigured { source_name: String },
}

impl VerificationError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
}

impl From<VerificationError> for ApiError {
    fn from(error: VerificationError) -> Self {
        tracing::warn!(error = %error, "Rejected webhook delivery");
        ApiError::new(error.status_code(), "UNAUTHORIZED", error.to_string())
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

fn mac_for(secret: &str, parts: &[&[u8]]) -> VerificationResult<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| VerificationError::VerificationFailed)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn compare(expected: &[u8], provided_hex: &str, header: &str) -> VerificationResult<()> {
    let provided = hex::decode(provided_hex.trim()).map_err(|_| VerificationError::InvalidSignatureFormat {
        header: format!("{header} contains invalid hex"),
    })?;

    if expected.ct_eq(&provided[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> VerificationResult<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| VerificationError::MissingSignature {
            header: name.to_string(),
        })
}

/// Hex HMAC-SHA256 of `body`, as the calendar provider sends it.
pub fn calendar_signature(body: &[u8], secret: &str) -> VerificationResult<String> {
    mac_for(secret, &[body]).map(hex::encode)
}

/// Verifies a calendar/agent delivery: hex HMAC-SHA256 of the raw body, optionally prefixed
/// with `sha256=`.
pub fn verify_calendar_signature(body: &[u8], headers: &HeaderMap, secret: &str) -> VerificationResult<()> {
    debug!(body_size = body.len(), "Verifying calendar webhook signature");
    let signature = header_value(headers, CALENDAR_SIGNATURE_HEADER)?;
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = mac_for(secret, &[body])?;
    compare(&expected, signature, CALENDAR_SIGNATURE_HEADER)
}

/// `t=<unix>,v1=<hex>` header value for a transcoding delivery signed at `timestamp`.
pub fn transcoding_signature(body: &[u8], secret: &str, timestamp: u64) -> VerificationResult<String> {
    let ts = timestamp.to_string();
    let mac = mac_for(secret, &[ts.as_bytes(), b".", body])?;
    Ok(format!("t={ts},v1={}", hex::encode(mac)))
}

/// Verifies a transcoding delivery: `t=<unix>,v1=<hex>` where the MAC covers `"{t}.{body}"`,
/// and `t` must be within `tolerance_seconds` of now.
pub fn verify_transcoding_signature(
    body: &[u8],
    headers: &HeaderMap,
    secret: &str,
    tolerance_seconds: u64,
) -> VerificationResult<()> {
    debug!(body_size = body.len(), tolerance_seconds, "Verifying transcoding webhook signature");
    let header = header_value(headers, TRANSCODING_SIGNATURE_HEADER)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<u64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let (Some(timestamp), false) = (timestamp, signatures.is_empty()) else {
        return Err(VerificationError::InvalidSignatureFormat {
            header: format!("{TRANSCODING_SIGNATURE_HEADER} must carry t= and v1="),
        });
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let drift = now.abs_diff(timestamp);
    if drift > tolerance_seconds {
        return Err(if now > timestamp {
            VerificationError::TimestampTooOld {
                seconds: drift,
                max_seconds: tolerance_seconds,
            }
        } else {
            VerificationError::TimestampTooFuture {
                seconds: drift,
                max_seconds: tolerance_seconds,
            }
        });
    }

    let ts = timestamp.to_string();
    let expected = mac_for(secret, &[ts.as_bytes(), b".", body])?;
    // Rotation may send several v1 entries; any match is enough.
    if signatures
        .iter()
        .any(|candidate| compare(&expected, candidate, TRANSCODING_SIGNATURE_HEADER).is_ok())
    {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}
