//! # Operator Handlers
//!
//! Bearer-protected endpoints for manual sync, dispatch and cancellation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, EngineError};
use crate::models::{dispatch_job, recording};
use crate::server::AppState;
use crate::sync::{SyncReport, SyncWindow};
use crate::time_utils::parse_iso_datetime;

/// Sync window override
#[derive(Debug, Deserialize, IntoParams)]
pub struct SyncParams {
    /// Days ahead of today to synchronize (defaults to the configured window)
    #[param(minimum = 1, maximum = 365, example = 14)]
    pub days: Option<i64>,
    /// RFC 3339 start of the window (defaults to today 00:00 UTC)
    #[param(example = "2026-11-02T00:00:00Z")]
    pub from: Option<String>,
}

/// Result of a manual cancellation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    /// False when the recording was already terminal
    pub changed: bool,
    pub recording: recording::Model,
}

async fn load_recording(state: &AppState, id: Uuid) -> Result<recording::Model, ApiError> {
    state
        .recordings
        .find_by_id(id)
        .await?
        .ok_or_else(|| EngineError::not_found("recording", id).into())
}

/// Pull and reconcile a user's calendar events
#[utoipa::path(
    post,
    path = "/users/{user_id}/sync",
    params(
        ("user_id" = Uuid, Path, description = "User whose calendar is synchronized"),
        SyncParams
    ),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sync finished", body = SyncReport),
        (status = 400, description = "Invalid window", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "User has no grant", body = ApiError),
        (status = 409, description = "Grant is not active", body = ApiError),
        (status = 502, description = "Calendar provider failed", body = ApiError)
    ),
    tag = "operator"
)]
pub async fn sync_user(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncReport>, ApiError> {
    let days = params.days.unwrap_or(state.config.sync.window_days);
    if !(1..=365).contains(&days) {
        return Err(EngineError::validation("days must be between 1 and 365").into());
    }

    let window = match params.from.as_deref() {
        Some(from) => {
            let start = parse_iso_datetime(from).map_err(|err| EngineError::validation(err.to_string()))?;
            SyncWindow::starting_at(start, days)
        }
        None => SyncWindow::from_today(Utc::now(), days),
    };

    let report = state.synchronizer.sync(user_id, window).await?;
    Ok(Json(report))
}

/// Queue an immediate notetaker dispatch for an event
#[utoipa::path(
    post,
    path = "/events/{event_id}/dispatch",
    params(("event_id" = Uuid, Path, description = "Local event id")),
    security(("bearer_auth" = [])),
    responses(
        (status = 202, description = "Dispatch job queued (or already pending)", body = dispatch_job::Model),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Event not found", body = ApiError),
        (status = 409, description = "Grant is not active", body = ApiError)
    ),
    tag = "operator"
)]
pub async fn dispatch_event(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<(StatusCode, Json<dispatch_job::Model>), ApiError> {
    let event = state
        .events
        .find_by_id(event_id)
        .await?
        .ok_or_else(|| EngineError::not_found("event", event_id))?;

    let job = state.scheduler.enqueue(&event, Utc::now()).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Cancel a recording
#[utoipa::path(
    post,
    path = "/recordings/{recording_id}/cancel",
    params(("recording_id" = Uuid, Path, description = "Recording id")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Recording state after cancellation", body = CancelResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Recording not found", body = ApiError)
    ),
    tag = "operator"
)]
pub async fn cancel_recording(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(recording_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let changed = state.lifecycle.cancel(recording_id).await?;
    let recording = load_recording(&state, recording_id).await?;
    Ok(Json(CancelResponse { changed, recording }))
}

/// Fetch a recording
#[utoipa::path(
    get,
    path = "/recordings/{recording_id}",
    params(("recording_id" = Uuid, Path, description = "Recording id")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Recording", body = recording::Model),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Recording not found", body = ApiError)
    ),
    tag = "operator"
)]
pub async fn get_recording(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(recording_id): Path<Uuid>,
) -> Result<Json<recording::Model>, ApiError> {
    load_recording(&state, recording_id).await.map(Json)
}
