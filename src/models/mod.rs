//! # Data Models
//!
//! SeaORM entities for events, recordings, the dispatch queue, the webhook audit log, grants
//! and per-user recording rules.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod dispatch_job;
pub mod event;
pub mod grant;
pub mod recording;
pub mod recording_rule;
pub mod webhook_delivery;

pub use dispatch_job::Entity as DispatchJob;
pub use event::Entity as Event;
pub use grant::Entity as Grant;
pub use recording::Entity as Recording;
pub use recording_rule::Entity as RecordingRule;
pub use webhook_delivery::Entity as WebhookDelivery;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "notetaker-orchestrator".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
