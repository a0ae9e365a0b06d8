//! # Tests for Handlers
//!
//! Router-level tests for health checks, webhook ingestion and operator authentication.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, EntityTrait};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::models::WebhookDelivery;
use crate::server::{AppState, Clients, create_app};
use crate::webhook_verification::{
    CALENDAR_SIGNATURE_HEADER, TRANSCODING_SIGNATURE_HEADER, calendar_signature,
    transcoding_signature,
};

const OPERATOR_TOKEN: &str = "operator-token";
const CALENDAR_SECRET: &str = "calendar-secret";

async fn setup_app(config: AppConfig) -> (Router, AppState) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let clients = Clients::from_config(&config).unwrap();
    let state = AppState::new(config, db, clients);
    (create_app(state.clone()), state)
}

fn test_config() -> AppConfig {
    AppConfig {
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        calendar_webhook_secret: Some(CALENDAR_SECRET.to_string()),
        ..AppConfig::default()
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_and_health_checks() {
    let (app, _) = setup_app(test_config()).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["service"], "notetaker-orchestrator");
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));

    for path in ["/healthz", "/readyz"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        assert_eq!(body_json(response).await["status"], "ok");
    }
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let (app, _) = setup_app(test_config()).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn test_calendar_challenge_is_echoed_without_signature() {
    let (app, _) = setup_app(test_config()).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/calendar")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"challenge","challenge":"tok-123"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"challenge": "tok-123"}));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/webhooks/calendar?challenge=tok-456")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"tok-456");
}

#[tokio::test]
async fn test_calendar_webhook_rejects_bad_signatures() {
    let (app, state) = setup_app(test_config()).await;
    let body = r#"{"type":"grant.deleted","data":{"object":{"grant_id":"g-1"}}}"#;

    let missing = Request::builder()
        .method("POST")
        .uri("/webhooks/calendar")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");

    let wrong = calendar_signature(body.as_bytes(), "other-secret").unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/calendar")
                .header(CALENDAR_SIGNATURE_HEADER, wrong)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let audited = WebhookDelivery::find().all(&state.db).await.unwrap();
    assert!(audited.is_empty(), "rejected deliveries are not audited");
}

#[tokio::test]
async fn test_signed_unknown_delivery_is_acknowledged_and_audited() {
    let (app, state) = setup_app(test_config()).await;
    let body = r#"{"type":"calendar.created","data":{"object":{}}}"#;
    let signature = calendar_signature(body.as_bytes(), CALENDAR_SECRET).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/calendar")
                .header(CALENDAR_SIGNATURE_HEADER, format!("sha256={signature}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ignored");

    let audited = WebhookDelivery::find().all(&state.db).await.unwrap();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].delivery_type, "calendar.created");
}

#[tokio::test]
async fn test_signed_garbage_still_returns_ok() {
    let (app, state) = setup_app(test_config()).await;
    let body = "definitely not json";
    let signature = calendar_signature(body.as_bytes(), CALENDAR_SECRET).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/calendar")
                .header(CALENDAR_SIGNATURE_HEADER, signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "error");

    let audited = WebhookDelivery::find().all(&state.db).await.unwrap();
    assert_eq!(audited.len(), 1);
}

#[tokio::test]
async fn test_transcoding_webhook_requires_configured_secret() {
    let (app, _) = setup_app(test_config()).await;
    let body = r#"{"type":"video.asset.ready","data":{"id":"asset-1","status":"ready"}}"#;
    let now = chrono::Utc::now().timestamp() as u64;
    let header = transcoding_signature(body.as_bytes(), "whatever", now).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/transcoding")
                .header(TRANSCODING_SIGNATURE_HEADER, header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_transcoding_delivery_is_accepted() {
    let secret = "transcoding-secret";
    let (app, state) = setup_app(AppConfig {
        transcoding_webhook_secret: Some(secret.to_string()),
        ..test_config()
    })
    .await;
    let body = r#"{"type":"video.asset.ready","data":{"id":"asset-unknown","status":"ready"}}"#;
    let now = chrono::Utc::now().timestamp() as u64;
    let header = transcoding_signature(body.as_bytes(), secret, now).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/transcoding")
                .header(TRANSCODING_SIGNATURE_HEADER, header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let audited = WebhookDelivery::find().all(&state.db).await.unwrap();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].delivery_type, "video.asset.ready");
}

#[tokio::test]
async fn test_operator_routes_require_bearer_token() {
    let (app, _) = setup_app(test_config()).await;
    let id = uuid::Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/recordings/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/recordings/{id}"))
                .header(AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_sync_rejects_out_of_range_window() {
    let (app, _) = setup_app(test_config()).await;
    let id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/users/{id}/sync?days=0"))
                .header(AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sync_rejects_malformed_window_start() {
    let (app, _) = setup_app(test_config()).await;
    let id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/users/{id}/sync?days=7&from=2026-11-02%2010:00"))
                .header(AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (app, _) = setup_app(test_config()).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/webhooks/calendar"].is_object());
    assert!(doc["paths"]["/recordings/{recording_id}/cancel"].is_object());
}
