//! # Webhook Handlers
//!
//! Public ingestion endpoints for calendar/agent and transcoding deliveries. Handshake
//! challenges are answered before any signature check; everything else must carry a valid
//! HMAC signature. Once verified, a delivery is always acknowledged with 200 and its outcome
//! lives in the audit log.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::models::webhook_delivery::DeliveryStatus;
use crate::server::AppState;
use crate::webhook_verification::{
    VerificationError, verify_calendar_signature, verify_transcoding_signature,
};

/// Handshake query sent when a webhook subscription is registered
#[derive(Debug, Deserialize, IntoParams)]
pub struct ChallengeQuery {
    /// Token to echo back verbatim
    pub challenge: Option<String>,
}

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// Outcome recorded in the delivery audit log
    pub status: DeliveryStatus,
}

/// Returns the handshake token when the body is a `challenge` delivery.
fn challenge_token(body: &[u8]) -> Option<String> {
    let payload: JsonValue = serde_json::from_slice(body).ok()?;
    if payload.get("type").and_then(JsonValue::as_str) != Some("challenge") {
        return None;
    }
    payload
        .get("challenge")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

/// Bodies that are not JSON are still routed so they end up in the audit log as errors.
fn parse_body(body: &[u8]) -> JsonValue {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(body).into_owned()))
}

fn accepted(status: DeliveryStatus) -> Response {
    (StatusCode::OK, Json(WebhookAcceptResponse { status })).into_response()
}

/// Answer the calendar provider's GET handshake
#[utoipa::path(
    get,
    path = "/webhooks/calendar",
    params(ChallengeQuery),
    responses(
        (status = 200, description = "Challenge token echoed as plain text", body = String),
        (status = 400, description = "Missing challenge parameter", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn calendar_challenge(Query(query): Query<ChallengeQuery>) -> Result<String, ApiError> {
    query.challenge.ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "challenge query parameter is required",
        )
    })
}

/// Ingest a calendar or notetaker delivery
#[utoipa::path(
    post,
    path = "/webhooks/calendar",
    params(
        ("X-Webhook-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body, optional sha256= prefix")
    ),
    request_body(content = Option<JsonValue>, description = "Tagged delivery `{type, data}`", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery accepted, or challenge echoed", body = WebhookAcceptResponse),
        (status = 401, description = "Missing or invalid signature", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn calendar_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(token) = challenge_token(&body) {
        debug!("Answering calendar webhook challenge");
        return Ok(Json(json!({ "challenge": token })).into_response());
    }

    let secret = state.config.calendar_webhook_secret.as_deref().ok_or_else(|| {
        VerificationError::NotConfigured {
            source_name: "calendar".to_string(),
        }
    })?;
    verify_calendar_signature(&body, &headers, secret)?;

    let status = state.webhooks.route_calendar(parse_body(&body)).await;
    info!(status = ?status, "Calendar webhook processed");
    Ok(accepted(status))
}

/// Ingest a transcoding delivery
#[utoipa::path(
    post,
    path = "/webhooks/transcoding",
    params(
        ("Transcoding-Signature" = String, Header, description = "t=<unix>,v1=<hex HMAC-SHA256 of \"t.body\">")
    ),
    request_body(content = Option<JsonValue>, description = "Asset delivery `{type, data}`", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery accepted", body = WebhookAcceptResponse),
        (status = 401, description = "Missing, invalid or stale signature", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn transcoding_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let secret = state.config.transcoding_webhook_secret.as_deref().ok_or_else(|| {
        VerificationError::NotConfigured {
            source_name: "transcoding".to_string(),
        }
    })?;
    verify_transcoding_signature(
        &body,
        &headers,
        secret,
        state.config.transcoding_webhook_tolerance_seconds,
    )?;

    let status = state.webhooks.route_transcoding(parse_body(&body)).await;
    info!(status = ?status, "Transcoding webhook processed");
    Ok(accepted(status))
}
