//! Test utilities shared by the integration suites.
//!
//! In-memory SQLite with migrations applied, seeding helpers, and in-process fakes for the
//! calendar, notetaker and transcoding clients that count every call.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use notetaker::config::AppConfig;
use notetaker::error::{EngineError, RemoteService};
use notetaker::models::grant::{self, GrantStatus};
use notetaker::providers::notetaker::{MediaFile, NotetakerSession};
use notetaker::providers::transcoding::PlaybackId;
use notetaker::providers::{
    CalendarApi, NotetakerApi, NotetakerMedia, NotetakerRequest, ProviderEvent, TranscodingApi,
    TranscodingAsset,
};
use notetaker::repositories::GrantRepository;
use notetaker::server::{AppState, Clients};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// How a fake should fail its next calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    None,
    Retryable,
    Permanent,
}

fn remote_error(service: RemoteService, mode: FailureMode) -> Option<EngineError> {
    match mode {
        FailureMode::None => None,
        FailureMode::Retryable => Some(EngineError::Remote {
            service,
            status: Some(503),
            message: "service unavailable".to_string(),
            retryable: true,
        }),
        FailureMode::Permanent => Some(EngineError::Remote {
            service,
            status: Some(400),
            message: "invalid meeting link".to_string(),
            retryable: false,
        }),
    }
}

pub struct FakeNotetaker {
    pub created: AtomicUsize,
    pub requests: Mutex<Vec<NotetakerRequest>>,
    pub updates: Mutex<Vec<(String, NotetakerRequest)>>,
    pub cancelled: Mutex<Vec<String>>,
    pub create_failure: Mutex<FailureMode>,
    pub update_failure: Mutex<FailureMode>,
}

impl FakeNotetaker {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            create_failure: Mutex::new(FailureMode::None),
            update_failure: Mutex::new(FailureMode::None),
        }
    }

    pub fn fail_creates(&self, mode: FailureMode) {
        *self.create_failure.lock().unwrap() = mode;
    }

    pub fn fail_updates(&self, mode: FailureMode) {
        *self.update_failure.lock().unwrap() = mode;
    }

    pub fn create_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }

    pub fn update_calls(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

#[async_trait]
impl NotetakerApi for FakeNotetaker {
    async fn create(&self, _grant_id: &str, request: &NotetakerRequest) -> Result<NotetakerSession, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = remote_error(RemoteService::Notetaker, *self.create_failure.lock().unwrap()) {
            return Err(err);
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(NotetakerSession {
            id: format!("nt-{n}"),
            state: Some("scheduled".to_string()),
        })
    }

    async fn update(
        &self,
        _grant_id: &str,
        session_id: &str,
        request: &NotetakerRequest,
    ) -> Result<(), EngineError> {
        self.updates
            .lock()
            .unwrap()
            .push((session_id.to_string(), request.clone()));
        match remote_error(RemoteService::Notetaker, *self.update_failure.lock().unwrap()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn cancel(&self, _grant_id: &str, session_id: &str) -> Result<(), EngineError> {
        self.cancelled.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn media(&self, _grant_id: &str, session_id: &str) -> Result<NotetakerMedia, EngineError> {
        Ok(NotetakerMedia {
            recording: Some(MediaFile {
                url: Some(format!("https://media.example.com/{session_id}.mp4")),
                size: Some(1024),
            }),
            transcript: None,
        })
    }
}

/// Transcoding fake: assets are created in `preparing` and settle to whatever the test sets.
pub struct FakeTranscoding {
    pub assets: Mutex<HashMap<String, TranscodingAsset>>,
    pub inputs: Mutex<Vec<String>>,
    pub lookups: AtomicUsize,
}

impl FakeTranscoding {
    pub fn new() -> Self {
        Self {
            assets: Mutex::new(HashMap::new()),
            inputs: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_asset(&self, asset: TranscodingAsset) {
        self.assets.lock().unwrap().insert(asset.id.clone(), asset);
    }
}

pub fn asset(id: &str, status: &str) -> TranscodingAsset {
    TranscodingAsset {
        id: id.to_string(),
        status: status.to_string(),
        playback_ids: if status == "ready" {
            vec![PlaybackId {
                id: format!("pb-{id}"),
                policy: Some("public".to_string()),
            }]
        } else {
            Vec::new()
        },
        duration: (status == "ready").then_some(61.6),
        errors: None,
    }
}

#[async_trait]
impl TranscodingApi for FakeTranscoding {
    async fn create_asset(&self, input_url: &str) -> Result<TranscodingAsset, EngineError> {
        let mut inputs = self.inputs.lock().unwrap();
        inputs.push(input_url.to_string());
        let created = asset(&format!("asset-{}", inputs.len()), "preparing");
        self.assets
            .lock()
            .unwrap()
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_asset(&self, asset_id: &str) -> Result<TranscodingAsset, EngineError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.assets
            .lock()
            .unwrap()
            .get(asset_id)
            .cloned()
            .ok_or_else(|| EngineError::Remote {
                service: RemoteService::Transcoding,
                status: Some(404),
                message: "asset not found".to_string(),
                retryable: false,
            })
    }
}

/// Calendar fake. `events` is what listings return; `upstream` holds events that can only be
/// fetched by id, like series masters hidden by an expanded listing.
pub struct FakeCalendar {
    pub events: Mutex<Vec<ProviderEvent>>,
    pub upstream: Mutex<Vec<ProviderEvent>>,
    pub calls: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl FakeCalendar {
    pub fn new(events: Vec<Value>) -> Self {
        Self {
            events: Mutex::new(
                events
                    .into_iter()
                    .map(|value| serde_json::from_value(value).unwrap())
                    .collect(),
            ),
            upstream: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn add_upstream(&self, event: Value) {
        self.upstream
            .lock()
            .unwrap()
            .push(serde_json::from_value(event).unwrap());
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarApi for FakeCalendar {
    async fn list_events(
        &self,
        _grant_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<ProviderEvent>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.events.lock().unwrap().clone())
    }

    async fn get_event(&self, _grant_id: &str, event_id: &str) -> Result<Option<ProviderEvent>, EngineError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let listed = self.events.lock().unwrap().clone();
        let upstream = self.upstream.lock().unwrap().clone();
        Ok(listed
            .into_iter()
            .chain(upstream)
            .find(|event| event.id.as_deref() == Some(event_id)))
    }
}

/// A fully wired engine over fakes.
pub struct TestEngine {
    pub state: AppState,
    pub notetaker: Arc<FakeNotetaker>,
    pub transcoding: Arc<FakeTranscoding>,
    pub calendar: Arc<FakeCalendar>,
}

impl TestEngine {
    pub async fn new() -> Result<Self> {
        Self::with_config(AppConfig::default(), Vec::new()).await
    }

    pub async fn with_config(config: AppConfig, calendar_events: Vec<Value>) -> Result<Self> {
        let db = setup_test_db().await?;
        let notetaker = Arc::new(FakeNotetaker::new());
        let transcoding = Arc::new(FakeTranscoding::new());
        let calendar = Arc::new(FakeCalendar::new(calendar_events));
        let clients = Clients {
            calendar: calendar.clone(),
            notetaker: notetaker.clone(),
            transcoding: transcoding.clone(),
        };

        Ok(Self {
            state: AppState::new(config, db, clients),
            notetaker,
            transcoding,
            calendar,
        })
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }
}

/// Stores an active grant for a fresh user.
pub async fn seed_grant(db: &DatabaseConnection, grant_id: &str) -> Result<grant::Model> {
    let grant = GrantRepository::new(db.clone())
        .upsert(
            Uuid::new_v4(),
            grant_id,
            Some("owner@acme.com".to_string()),
            GrantStatus::Active,
        )
        .await?;
    Ok(grant)
}

/// A provider event with an external guest and a join link.
pub fn provider_event(id: &str, start: DateTime<Utc>, updated_at: i64) -> Value {
    let end = start + chrono::Duration::minutes(30);
    json!({
        "id": id,
        "ical_uid": format!("{id}@calendar"),
        "title": "Customer call",
        "when": {
            "object": "timespan",
            "start_time": start.timestamp(),
            "end_time": end.timestamp(),
        },
        "conferencing": {
            "provider": "Zoom Meeting",
            "details": { "url": "https://zoom.example.com/j/123" }
        },
        "organizer": { "name": "Owner", "email": "owner@acme.com" },
        "participants": [
            { "email": "owner@acme.com" },
            { "email": "guest@customer.io" }
        ],
        "updated_at": updated_at,
    })
}

pub fn event_delivery(kind: &str, grant_id: &str, object: Value) -> Value {
    json!({
        "type": kind,
        "data": { "grant_id": grant_id, "object": object }
    })
}

pub fn agent_delivery(kind: &str, grant_id: &str, session_id: &str, state: &str) -> Value {
    json!({
        "type": kind,
        "data": {
            "grant_id": grant_id,
            "object": { "id": session_id, "grant_id": grant_id, "state": state }
        }
    })
}

/// An occurrence of the `series` master that shares its calendar UID.
pub fn series_instance(id: &str, series: &str, start: DateTime<Utc>, updated_at: i64) -> Value {
    let mut value = provider_event(id, start, updated_at);
    value["ical_uid"] = json!(format!("{series}@calendar"));
    value["master_event_id"] = json!(series);
    value
}

/// A recurring series master.
pub fn series_master(series: &str, start: DateTime<Utc>, updated_at: i64) -> Value {
    let mut value = provider_event(series, start, updated_at);
    value["ical_uid"] = json!(format!("{series}@calendar"));
    value["recurrence"] = json!(["RRULE:FREQ=DAILY"]);
    value
}
