//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the engine's tables.
//! Status and watermark changes are conditional updates so concurrent writers never lose
//! each other's progress.

use sea_orm::DbErr;

use crate::error::EngineError;

pub mod dispatch_job;
pub mod event;
pub mod grant;
pub mod recording;
pub mod recording_rule;
pub mod webhook_delivery;

pub use dispatch_job::DispatchJobRepository;
pub use event::{EventRepository, NewEvent, UpsertOutcome};
pub use grant::GrantRepository;
pub use recording::{RecordingPatch, RecordingRepository};
pub use recording_rule::RecordingRuleRepository;
pub use webhook_delivery::{DeliveryRecord, WebhookDeliveryRepository};

/// Logs a database failure with context and lifts it into [`EngineError`].
pub(crate) fn map_db_err(context: &'static str) -> impl FnOnce(DbErr) -> EngineError {
    move |err| {
        tracing::error!(error = %err, "{context}");
        EngineError::Database(err)
    }
}
