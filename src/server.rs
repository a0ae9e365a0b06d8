//! # Server Configuration
//!
//! Wires repositories, provider clients and engine services into the Axum application and
//! owns the lifecycles of the background workers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::dispatch::DispatchScheduler;
use crate::handlers;
use crate::lifecycle::NotetakerLifecycle;
use crate::monitor::StalledRecordingMonitor;
use crate::providers::{
    CalendarApi, CalendarClient, NotetakerApi, NotetakerClient, TranscodingApi, TranscodingClient,
    build_http_client,
};
use crate::repositories::{
    DispatchJobRepository, EventRepository, GrantRepository, RecordingRepository,
    RecordingRuleRepository, WebhookDeliveryRepository,
};
use crate::sync::{DedupSweeper, EventSynchronizer};
use crate::telemetry::trace_context_middleware;
use crate::webhooks::WebhookRouter;

/// Outbound provider clients, injected so tests can substitute fakes.
#[derive(Clone)]
pub struct Clients {
    pub calendar: Arc<dyn CalendarApi>,
    pub notetaker: Arc<dyn NotetakerApi>,
    pub transcoding: Arc<dyn TranscodingApi>,
}

impl Clients {
    /// Builds HTTP clients for the configured provider endpoints.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let http = build_http_client(Duration::from_millis(config.http_timeout_ms))?;
        let api_key = config.calendar_api_key.clone().unwrap_or_default();

        Ok(Self {
            calendar: Arc::new(CalendarClient::new(
                http.clone(),
                &config.calendar_api_base,
                &api_key,
            )),
            notetaker: Arc::new(NotetakerClient::new(
                http.clone(),
                &config.calendar_api_base,
                &api_key,
            )),
            transcoding: Arc::new(TranscodingClient::new(
                http,
                &config.transcoding_api_base,
                config.transcoding_token_id.clone().unwrap_or_default(),
                config.transcoding_token_secret.clone().unwrap_or_default(),
            )),
        })
    }
}

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub clients: Clients,
    pub events: EventRepository,
    pub recordings: RecordingRepository,
    pub lifecycle: Arc<NotetakerLifecycle>,
    pub scheduler: Arc<DispatchScheduler>,
    pub synchronizer: Arc<EventSynchronizer>,
    pub webhooks: Arc<WebhookRouter>,
}

impl AppState {
    pub fn new(config: AppConfig, db: DatabaseConnection, clients: Clients) -> Self {
        let events = EventRepository::new(db.clone());
        let recordings = RecordingRepository::new(db.clone());
        let grants = GrantRepository::new(db.clone());
        let jobs = DispatchJobRepository::new(db.clone());

        let lifecycle = Arc::new(NotetakerLifecycle::new(
            events.clone(),
            recordings.clone(),
            grants.clone(),
            clients.notetaker.clone(),
            clients.transcoding.clone(),
            &config.notetaker_name,
        ));
        let scheduler = Arc::new(DispatchScheduler::new(
            config.dispatch.clone(),
            jobs.clone(),
            events.clone(),
            recordings.clone(),
            lifecycle.clone(),
        ));
        let synchronizer = Arc::new(EventSynchronizer::new(
            clients.calendar.clone(),
            events.clone(),
            lifecycle.clone(),
        ));
        let webhooks = Arc::new(WebhookRouter::new(
            events.clone(),
            recordings.clone(),
            grants,
            jobs,
            RecordingRuleRepository::new(db.clone()),
            WebhookDeliveryRepository::new(db.clone()),
            lifecycle.clone(),
            scheduler.clone(),
            synchronizer.clone(),
        ));

        Self {
            config: Arc::new(config),
            db,
            clients,
            events,
            recordings,
            lifecycle,
            scheduler,
            synchronizer,
            webhooks,
        }
    }

    pub fn monitor(&self) -> StalledRecordingMonitor {
        StalledRecordingMonitor::new(
            self.config.monitor.clone(),
            self.recordings.clone(),
            self.clients.transcoding.clone(),
            self.lifecycle.clone(),
        )
    }

    pub fn dedup_sweeper(&self) -> DedupSweeper {
        DedupSweeper::new(
            self.events.clone(),
            self.recordings.clone(),
            self.lifecycle.clone(),
            self.synchronizer.clone(),
        )
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route("/users/{user_id}/sync", post(handlers::operator::sync_user))
        .route(
            "/events/{event_id}/dispatch",
            post(handlers::operator::dispatch_event),
        )
        .route(
            "/recordings/{recording_id}",
            get(handlers::operator::get_recording),
        )
        .route(
            "/recordings/{recording_id}/cancel",
            post(handlers::operator::cancel_recording),
        )
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route(
            "/webhooks/calendar",
            get(handlers::webhooks::calendar_challenge).post(handlers::webhooks::calendar_webhook),
        )
        .route(
            "/webhooks/transcoding",
            post(handlers::webhooks::transcoding_webhook),
        )
        .merge(operator_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Starts the HTTP server and the background workers, and runs until ctrl-c.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let clients = Clients::from_config(&config)?;
    let state = AppState::new(config, db, clients);

    let shutdown = CancellationToken::new();
    let mut workers = tokio::task::JoinSet::new();
    workers.spawn(state.scheduler.clone().run(shutdown.child_token()));
    workers.spawn(state.monitor().run(shutdown.child_token()));
    workers.spawn(state.dedup_sweeper().run(
        Duration::from_secs(state.config.sync.dedup_interval_seconds),
        shutdown.child_token(),
    ));

    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %state.config.profile, "Server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    while let Some(result) = workers.join_next().await {
        if let Err(err) = result {
            tracing::error!(error = %err, "Background worker panicked");
        }
    }
    tracing::info!("Server stopped");
    Ok(())
}

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::webhooks::calendar_challenge,
        crate::handlers::webhooks::calendar_webhook,
        crate::handlers::webhooks::transcoding_webhook,
        crate::handlers::operator::sync_user,
        crate::handlers::operator::dispatch_event,
        crate::handlers::operator::cancel_recording,
        crate::handlers::operator::get_recording,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::handlers::operator::CancelResponse,
            crate::models::recording::Model,
            crate::models::recording::RecordingStatus,
            crate::models::dispatch_job::Model,
            crate::models::dispatch_job::DispatchJobStatus,
            crate::models::webhook_delivery::DeliveryStatus,
            crate::sync::SyncReport,
            crate::error::ApiError,
        )
    ),
    modifiers(&BearerAuthAddon),
    tags(
        (name = "root", description = "Service health checks"),
        (name = "webhooks", description = "Signed provider deliveries"),
        (name = "operator", description = "Bearer-protected operator actions"),
    ),
    info(
        title = "Notetaker Orchestrator API",
        description = "Schedules meeting notetakers from calendar events and reconciles their recordings",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
