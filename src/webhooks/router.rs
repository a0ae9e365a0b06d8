//! # Webhook Router
//!
//! Applies verified deliveries to the local store. Every handler is idempotent: status moves
//! are compare-and-set and event writes are watermark-guarded, so redeliveries and
//! out-of-order arrivals settle to the same state. Every delivery, including failed and
//! ignored ones, lands in the audit log.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::payload::{
    AgentStatus, AgentUpdate, CalendarWebhook, DeletedEvent, GrantObject, ObjectData,
    TranscodingWebhook, map_agent_status,
};
use crate::dispatch::DispatchScheduler;
use crate::error::EngineError;
use crate::lifecycle::{NotetakerLifecycle, TranscodeOutcome};
use crate::models::grant::{self, GrantStatus};
use crate::models::recording::{RecordingStatus, TransitionSource};
use crate::models::webhook_delivery::{DeliverySource, DeliveryStatus};
use crate::providers::calendar::ProviderEvent;
use crate::providers::transcoding::TranscodingAsset;
use crate::repositories::{
    DeliveryRecord, DispatchJobRepository, EventRepository, GrantRepository, RecordingPatch,
    RecordingRepository, RecordingRuleRepository, UpsertOutcome, WebhookDeliveryRepository,
};
use crate::rules::should_record;
use crate::sync::{EventSynchronizer, MasterLookup, normalize_event};

/// What a handler did, for the audit row.
#[derive(Debug, Clone, Default, PartialEq)]
struct Handled {
    ignored: bool,
    recording_id: Option<Uuid>,
    message: Option<String>,
}

impl Handled {
    fn done(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn ignored(message: impl Into<String>) -> Self {
        Self {
            ignored: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn with_recording(mut self, id: Uuid) -> Self {
        self.recording_id = Some(id);
        self
    }
}

#[derive(Clone)]
pub struct WebhookRouter {
    events: EventRepository,
    recordings: RecordingRepository,
    grants: GrantRepository,
    jobs: DispatchJobRepository,
    rules: RecordingRuleRepository,
    deliveries: WebhookDeliveryRepository,
    lifecycle: Arc<NotetakerLifecycle>,
    scheduler: Arc<DispatchScheduler>,
    synchronizer: Arc<EventSynchronizer>,
}

impl WebhookRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: EventRepository,
        recordings: RecordingRepository,
        grants: GrantRepository,
        jobs: DispatchJobRepository,
        rules: RecordingRuleRepository,
        deliveries: WebhookDeliveryRepository,
        lifecycle: Arc<NotetakerLifecycle>,
        scheduler: Arc<DispatchScheduler>,
        synchronizer: Arc<EventSynchronizer>,
    ) -> Self {
        Self {
            events,
            recordings,
            grants,
            jobs,
            rules,
            deliveries,
            lifecycle,
            scheduler,
            synchronizer,
        }
    }

    /// Routes a verified calendar/agent delivery and audits the result. Never fails: routing
    /// errors become `error` audit rows.
    #[instrument(skip_all, fields(delivery_type = tracing::field::Empty))]
    pub async fn route_calendar(&self, payload: JsonValue) -> DeliveryStatus {
        let delivery_type = payload
            .get("type")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::Span::current().record("delivery_type", delivery_type.as_str());

        let mut record = DeliveryRecord::new(DeliverySource::Calendar, &delivery_type, payload.clone());
        let result = match serde_json::from_value::<CalendarWebhook>(payload) {
            Ok(webhook) => {
                record.event_id = webhook.event_id().map(str::to_string);
                record.agent_session_id = webhook.session_id().map(str::to_string);
                self.dispatch_calendar(webhook).await
            }
            Err(err) => Err(EngineError::validation(format!("malformed payload: {err}"))),
        };

        self.audit(record, result).await
    }

    /// Routes a verified transcoding delivery and audits the result.
    #[instrument(skip_all, fields(delivery_type = tracing::field::Empty))]
    pub async fn route_transcoding(&self, payload: JsonValue) -> DeliveryStatus {
        let delivery_type = payload
            .get("type")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::Span::current().record("delivery_type", delivery_type.as_str());

        let record = DeliveryRecord::new(DeliverySource::Transcoding, &delivery_type, payload.clone());
        let result = match serde_json::from_value::<TranscodingWebhook>(payload) {
            Ok(webhook) => self.dispatch_transcoding(webhook).await,
            Err(err) => Err(EngineError::validation(format!("malformed payload: {err}"))),
        };

        self.audit(record, result).await
    }

    async fn audit(&self, mut record: DeliveryRecord, result: Result<Handled, EngineError>) -> DeliveryStatus {
        match result {
            Ok(handled) => {
                record.status = if handled.ignored {
                    DeliveryStatus::Ignored
                } else {
                    DeliveryStatus::Success
                };
                record.recording_id = handled.recording_id;
                record.message = handled.message;
            }
            Err(err) => {
                warn!(delivery_type = %record.delivery_type, error = %err, "Webhook routing failed");
                record.status = DeliveryStatus::Error;
                record.message = Some(err.to_string());
            }
        }

        let status = record.status;
        let source = match record.source {
            DeliverySource::Calendar => "calendar",
            DeliverySource::Transcoding => "transcoding",
        };
        let outcome = match status {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Error => "error",
            DeliveryStatus::Ignored => "ignored",
        };
        counter!("webhook_deliveries_total", "source" => source, "status" => outcome).increment(1);

        if let Err(err) = self.deliveries.record(record).await {
            warn!(error = %err, "Failed to write webhook audit row");
        }
        status
    }

    async fn dispatch_calendar(&self, webhook: CalendarWebhook) -> Result<Handled, EngineError> {
        match webhook {
            CalendarWebhook::Challenge { .. } => Ok(Handled::ignored("challenge handled at ingress")),
            CalendarWebhook::EventCreated { data } | CalendarWebhook::EventUpdated { data } => {
                self.on_event_upsert(data).await
            }
            CalendarWebhook::EventDeleted { data } => self.on_event_deleted(data).await,
            CalendarWebhook::NotetakerStatusUpdated { data } => self.on_agent_status(data.object).await,
            CalendarWebhook::NotetakerMediaUpdated { data } => self.on_agent_media(data.object).await,
            CalendarWebhook::GrantCreated { data } | CalendarWebhook::GrantUpdated { data } => {
                self.on_grant(data.object, GrantStatus::Active).await
            }
            CalendarWebhook::GrantDeleted { data } => self.on_grant(data.object, GrantStatus::Revoked).await,
            CalendarWebhook::GrantExpired { data } => self.on_grant(data.object, GrantStatus::Expired).await,
            CalendarWebhook::Unknown => Ok(Handled::ignored("unhandled delivery type")),
        }
    }

    async fn dispatch_transcoding(&self, webhook: TranscodingWebhook) -> Result<Handled, EngineError> {
        match webhook {
            TranscodingWebhook::AssetReady { mut data } => {
                data.status = "ready".to_string();
                self.on_asset_settled(data).await
            }
            TranscodingWebhook::AssetErrored { mut data } => {
                data.status = "errored".to_string();
                self.on_asset_settled(data).await
            }
            TranscodingWebhook::AssetDeleted { data } => {
                let cleared = self.recordings.clear_asset(&data.id).await?;
                Ok(Handled::done(format!("cleared asset from {cleared} recording(s)")))
            }
            TranscodingWebhook::Unknown => Ok(Handled::ignored("unhandled delivery type")),
        }
    }

    async fn grant_for(&self, grant_id: Option<&str>) -> Result<grant::Model, EngineError> {
        let grant_id = grant_id.ok_or_else(|| EngineError::validation("delivery has no grant id"))?;
        self.grants
            .find_by_grant_id(grant_id)
            .await?
            .ok_or_else(|| EngineError::not_found("grant", grant_id))
    }

    async fn on_event_upsert(&self, data: ObjectData<ProviderEvent>) -> Result<Handled, EngineError> {
        let grant_id = data.grant_id.as_deref().or(data.object.grant_id.as_deref());
        let grant = self.grant_for(grant_id).await?;
        let now = Utc::now();
        let normalized = normalize_event(&data.object, now)?;

        let outcome = self.events.upsert(grant.user_id, &normalized).await?;
        let (previous_start, event) = match outcome {
            UpsertOutcome::Stale(_) => return Ok(Handled::done("stale watermark, no change")),
            UpsertOutcome::Inserted(current) => (None, current),
            UpsertOutcome::Updated { previous, current } => (Some(previous.start_time), current),
        };

        if event.is_master() {
            return Ok(Handled::done("series master stored"));
        }

        if let Some(master_id) = event.master_event_id.as_deref() {
            match self
                .synchronizer
                .resolve_master(grant.user_id, &grant.grant_id, master_id)
                .await
            {
                Ok(MasterLookup::Deleted) => {
                    warn!(event_id = %event.id, master_event_id = master_id, "Instance of a deleted series");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(event_id = %event.id, master_event_id = master_id, error = %err, "Failed to resolve series master");
                }
            }
        }

        let prefs = self.rules.preferences(grant.user_id).await?;
        let wanted = should_record(&event, &prefs);
        let active = self.recordings.find_active_for_event(event.id).await?;
        let start = event.start_time.with_timezone(&Utc);

        match (wanted, active) {
            (true, None) => {
                if event.end_time.with_timezone(&Utc) <= now {
                    return Ok(Handled::done("event already ended"));
                }
                match self.lifecycle.dispatch(&event).await {
                    Ok(outcome) => Ok(Handled::done("notetaker dispatched").with_recording(outcome.recording().id)),
                    Err(err) if err.is_retryable() => {
                        warn!(event_id = %event.id, error = %err, "Dispatch failed, deferring to queue");
                        let job = self.scheduler.enqueue(&event, now).await?;
                        Ok(Handled::done(format!("dispatch deferred to job {}", job.id)))
                    }
                    Err(err) => Err(err),
                }
            }
            (true, Some(rec)) => {
                let moved = previous_start.is_some_and(|previous| previous != event.start_time);
                if moved && rec.status == RecordingStatus::Waiting {
                    match self.lifecycle.reschedule(rec.id, start).await {
                        Ok(()) => Ok(Handled::done("notetaker rescheduled").with_recording(rec.id)),
                        Err(err) => {
                            warn!(recording_id = %rec.id, error = %err, "Reschedule failed, agent keeps its join time");
                            Ok(Handled::done(format!("event stored, reschedule failed: {err}")).with_recording(rec.id))
                        }
                    }
                } else {
                    Ok(Handled::done("recording already active").with_recording(rec.id))
                }
            }
            (false, Some(rec)) if rec.status == RecordingStatus::Waiting => {
                self.lifecycle.cancel(rec.id).await?;
                Ok(Handled::done("notetaker cancelled, event no longer recordable").with_recording(rec.id))
            }
            (false, _) => Ok(Handled::done("event stored, not recorded")),
        }
    }

    async fn on_event_deleted(&self, data: ObjectData<DeletedEvent>) -> Result<Handled, EngineError> {
        let grant_id = data.grant_id.as_deref().or(data.object.grant_id.as_deref());
        let grant = self.grant_for(grant_id).await?;
        let Some(event) = self
            .events
            .find_by_provider_id(grant.user_id, &data.object.id)
            .await?
        else {
            return Ok(Handled::done("event not stored"));
        };

        let mut removed = 0;
        if event.is_master() {
            for instance in self
                .events
                .list_instances(grant.user_id, &event.provider_event_id)
                .await?
            {
                self.lifecycle.cancel_for_event(instance.id).await?;
                if self.events.delete(instance.id).await? {
                    removed += 1;
                }
            }
        }

        self.lifecycle.cancel_for_event(event.id).await?;
        self.events.delete(event.id).await?;
        info!(event_id = %event.id, instances = removed, "Event deleted");
        Ok(Handled::done(format!("event deleted with {removed} instance(s)")))
    }

    async fn on_agent_status(&self, update: AgentUpdate) -> Result<Handled, EngineError> {
        let raw = update.status.as_deref().unwrap_or_default();
        let next = match map_agent_status(raw) {
            Some(AgentStatus::Status(next)) => next,
            Some(AgentStatus::MediaAvailable | AgentStatus::MediaProcessing) => {
                return self.on_agent_media(update).await;
            }
            None => return Ok(Handled::ignored(format!("untracked agent status '{raw}'"))),
        };
        let source = if next == RecordingStatus::Cancelled {
            TransitionSource::Cancellation
        } else {
            TransitionSource::Agent
        };

        let recordings = self.recordings.find_by_session(&update.id).await?;
        if recordings.is_empty() {
            return Ok(Handled::ignored("unknown agent session"));
        }

        let mut handled = Handled::done(format!("no change for status '{raw}'"));
        for rec in recordings {
            handled.recording_id = Some(rec.id);
            if self
                .recordings
                .transition(rec.id, next, source, RecordingPatch::default())
                .await?
            {
                handled.message = Some(format!("recording moved to {}", next.as_str()));
            }
            if let Some(event_id) = rec.event_id {
                let superseded = self.jobs.supersede_pending_for_event(event_id).await?;
                if superseded > 0 {
                    info!(%event_id, superseded, "Superseded pending dispatch jobs");
                }
            }
        }
        Ok(handled)
    }

    async fn on_agent_media(&self, update: AgentUpdate) -> Result<Handled, EngineError> {
        let raw = update.status.as_deref().unwrap_or_default();
        let next = match map_agent_status(raw) {
            Some(AgentStatus::MediaAvailable) => RecordingStatus::Retrieving,
            Some(AgentStatus::MediaProcessing) => RecordingStatus::Processing,
            _ => return Ok(Handled::ignored(format!("untracked media state '{raw}'"))),
        };

        let recordings = self.recordings.find_by_session(&update.id).await?;
        if recordings.is_empty() {
            return Ok(Handled::ignored("unknown agent session"));
        }

        let mut handled = Handled::done("no change");
        for rec in recordings {
            handled.recording_id = Some(rec.id);
            let changed = self
                .recordings
                .transition(rec.id, next, TransitionSource::Media, RecordingPatch::default())
                .await?;
            if !changed {
                continue;
            }
            handled.message = Some(format!("recording moved to {}", next.as_str()));
            if next == RecordingStatus::Retrieving {
                self.lifecycle.retrieve_media(&rec).await?;
                handled.message = Some("media retrieved, transcoding started".to_string());
            }
        }
        Ok(handled)
    }

    async fn on_grant(&self, object: GrantObject, status: GrantStatus) -> Result<Handled, EngineError> {
        let grant_id = object
            .grant_id()
            .ok_or_else(|| EngineError::validation("grant delivery has no grant id"))?;
        if self.grants.set_status(grant_id, status).await? {
            info!(grant_id, status = status.as_str(), "Grant status updated");
            Ok(Handled::done(format!("grant {}", status.as_str())))
        } else {
            Ok(Handled::ignored("unknown grant"))
        }
    }

    async fn on_asset_settled(&self, asset: TranscodingAsset) -> Result<Handled, EngineError> {
        let recordings = self.recordings.find_by_asset(&asset.id).await?;
        if recordings.is_empty() {
            return Ok(Handled::ignored("unknown asset"));
        }

        let mut handled = Handled::done("no change");
        for rec in recordings {
            handled.recording_id = Some(rec.id);
            match self.lifecycle.settle_transcoding(rec.id, &asset).await? {
                TranscodeOutcome::Completed => handled.message = Some("recording completed".to_string()),
                TranscodeOutcome::Failed => handled.message = Some("recording failed".to_string()),
                TranscodeOutcome::Unchanged => {}
            }
        }
        Ok(handled)
    }
}
