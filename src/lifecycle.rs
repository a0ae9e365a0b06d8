//! # Notetaker Lifecycle
//!
//! Creates, reschedules and cancels remote recording agents, and hands finished captures to the
//! transcoding service. The local `recordings` row is the authoritative mirror of each agent:
//! remote calls come first, and a row is only written once the remote side has accepted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::event;
use crate::models::grant;
use crate::models::recording::{self, RecordingStatus, TransitionSource};
use crate::providers::notetaker::MeetingSettings;
use crate::providers::{NotetakerApi, NotetakerRequest, TranscodingApi, TranscodingAsset};
use crate::repositories::{EventRepository, GrantRepository, RecordingPatch, RecordingRepository};

/// Effect of a transcoding asset state on its recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Completed,
    Failed,
    /// Asset still preparing, or the recording had already moved on.
    Unchanged,
}

/// Result of a dispatch request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A new agent was created and recorded as waiting.
    Created(recording::Model),
    /// The event already had an active recording; nothing was sent.
    Existing(recording::Model),
}

impl DispatchOutcome {
    pub fn recording(&self) -> &recording::Model {
        match self {
            DispatchOutcome::Created(model) | DispatchOutcome::Existing(model) => model,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.recording().agent_session_id.as_deref()
    }
}

pub struct NotetakerLifecycle {
    events: EventRepository,
    recordings: RecordingRepository,
    grants: GrantRepository,
    notetaker: Arc<dyn NotetakerApi>,
    transcoding: Arc<dyn TranscodingApi>,
    agent_name: String,
}

impl NotetakerLifecycle {
    pub fn new(
        events: EventRepository,
        recordings: RecordingRepository,
        grants: GrantRepository,
        notetaker: Arc<dyn NotetakerApi>,
        transcoding: Arc<dyn TranscodingApi>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            events,
            recordings,
            grants,
            notetaker,
            transcoding,
            agent_name: agent_name.into(),
        }
    }

    /// The user's grant, provided it can be used for outbound calls.
    pub async fn active_grant(&self, user_id: Uuid) -> Result<grant::Model, EngineError> {
        let grant = self
            .grants
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("grant", user_id))?;

        if !grant.is_active() {
            return Err(EngineError::GrantInactive {
                grant_id: grant.grant_id.clone(),
                status: grant.status.as_str().to_string(),
            });
        }
        Ok(grant)
    }

    fn request_for(&self, meeting_link: &str, join_time: Option<DateTime<Utc>>) -> NotetakerRequest {
        NotetakerRequest {
            meeting_link: meeting_link.to_string(),
            join_time: join_time.map(|t| t.timestamp()),
            name: self.agent_name.clone(),
            meeting_settings: MeetingSettings::default(),
        }
    }

    /// Sends an agent to the event's meeting, at most once per event.
    #[instrument(skip_all, fields(event_id = %event.id, user_id = %event.user_id))]
    pub async fn dispatch(&self, event: &event::Model) -> Result<DispatchOutcome, EngineError> {
        let Some(link) = event.conference_url.as_deref().filter(|url| !url.trim().is_empty()) else {
            return Err(EngineError::validation("event has no conference url"));
        };
        let grant = self.active_grant(event.user_id).await?;

        if let Some(existing) = self.recordings.find_active_for_event(event.id).await? {
            info!(recording_id = %existing.id, "Event already has an active recording");
            return Ok(DispatchOutcome::Existing(existing));
        }

        let start = event.start_time.with_timezone(&Utc);
        let join_time = (start > Utc::now()).then_some(start);

        let session = match self
            .notetaker
            .create(&grant.grant_id, &self.request_for(link, join_time))
            .await
        {
            Ok(session) => session,
            Err(err) => {
                counter!("notetaker_dispatch_total", "outcome" => "error").increment(1);
                warn!(error = %err, "Notetaker creation failed");
                return Err(err);
            }
        };

        match self
            .recordings
            .insert_waiting(event.user_id, event.id, &session.id, join_time)
            .await
        {
            Ok(created) => {
                counter!("notetaker_dispatch_total", "outcome" => "created").increment(1);
                info!(recording_id = %created.id, session_id = %session.id, "Notetaker dispatched");
                Ok(DispatchOutcome::Created(created))
            }
            Err(EngineError::Conflict(_)) => {
                counter!("notetaker_dispatch_total", "outcome" => "superseded").increment(1);
                warn!(session_id = %session.id, "Concurrent dispatch won, cancelling extra agent");
                if let Err(err) = self.notetaker.cancel(&grant.grant_id, &session.id).await {
                    warn!(error = %err, session_id = %session.id, "Failed to cancel superseded agent");
                }
                self.recordings
                    .insert_superseded(event.user_id, event.id, &session.id, join_time)
                    .await?;

                let winner = self
                    .recordings
                    .find_active_for_event(event.id)
                    .await?
                    .ok_or_else(|| EngineError::Conflict(format!("active recording for event {} vanished", event.id)))?;
                Ok(DispatchOutcome::Existing(winner))
            }
            Err(err) => Err(err),
        }
    }

    /// Moves a waiting agent to a new join time, resending its full configuration.
    #[instrument(skip(self))]
    pub async fn reschedule(&self, recording_id: Uuid, join_time: DateTime<Utc>) -> Result<(), EngineError> {
        let rec = self
            .recordings
            .find_by_id(recording_id)
            .await?
            .ok_or_else(|| EngineError::not_found("recording", recording_id))?;

        if rec.status != RecordingStatus::Waiting {
            return Err(EngineError::Conflict(format!(
                "recording {recording_id} is {} and can no longer be rescheduled",
                rec.status.as_str()
            )));
        }
        let session_id = rec
            .agent_session_id
            .clone()
            .ok_or_else(|| EngineError::validation("recording has no agent session"))?;
        let event_id = rec
            .event_id
            .ok_or_else(|| EngineError::validation("recording is detached from its event"))?;
        let event = self
            .events
            .find_by_id(event_id)
            .await?
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        let link = event
            .conference_url
            .as_deref()
            .ok_or_else(|| EngineError::validation("event has no conference url"))?;
        let grant = self.active_grant(rec.user_id).await?;

        let request = self.request_for(link, Some(join_time));
        if let Err(err) = self.notetaker.update(&grant.grant_id, &session_id, &request).await {
            warn!(error = %err, %session_id, "Failed to reschedule notetaker");
            self.recordings.record_error(rec.id, &err.to_string()).await?;
            return Err(err);
        }

        self.recordings.update_join_time(rec.id, join_time).await?;
        info!(%session_id, join_time = %join_time, "Notetaker rescheduled");
        Ok(())
    }

    /// Cancels a recording. The remote cancel is best-effort; the local row always converges to
    /// cancelled unless it already reached completed or cancelled. Returns whether it changed.
    #[instrument(skip(self))]
    pub async fn cancel(&self, recording_id: Uuid) -> Result<bool, EngineError> {
        let rec = self
            .recordings
            .find_by_id(recording_id)
            .await?
            .ok_or_else(|| EngineError::not_found("recording", recording_id))?;

        if !rec.status.can_transition(RecordingStatus::Cancelled, TransitionSource::Cancellation) {
            return Ok(false);
        }

        if let (true, Some(session_id)) = (rec.status.is_active(), rec.agent_session_id.as_deref()) {
            match self.grants.find_by_user(rec.user_id).await? {
                Some(grant) => {
                    if let Err(err) = self.notetaker.cancel(&grant.grant_id, session_id).await {
                        warn!(error = %err, session_id, "Remote cancel failed, cancelling locally");
                    }
                }
                None => warn!(session_id, "No grant for remote cancel, cancelling locally"),
            }
        }

        let changed = self
            .recordings
            .transition(
                rec.id,
                RecordingStatus::Cancelled,
                TransitionSource::Cancellation,
                RecordingPatch::default(),
            )
            .await?;
        if changed {
            counter!("recordings_cancelled_total").increment(1);
            info!("Recording cancelled");
        }
        Ok(changed)
    }

    /// Cancels the event's active recording, if it has one.
    pub async fn cancel_for_event(&self, event_id: Uuid) -> Result<bool, EngineError> {
        match self.recordings.find_active_for_event(event_id).await? {
            Some(rec) => self.cancel(rec.id).await,
            None => Ok(false),
        }
    }

    /// Fetches the captured media and starts transcoding it. On success the recording moves to
    /// processing with its media url and asset id.
    #[instrument(skip_all, fields(recording_id = %rec.id))]
    pub async fn retrieve_media(&self, rec: &recording::Model) -> Result<bool, EngineError> {
        let result = self.start_transcoding(rec).await;
        if let Err(err) = &result {
            warn!(error = %err, "Media retrieval failed");
            let failed = self
                .recordings
                .transition(
                    rec.id,
                    RecordingStatus::Failed,
                    TransitionSource::Media,
                    RecordingPatch::error(err.to_string()),
                )
                .await?;
            if !failed {
                self.recordings.record_error(rec.id, &err.to_string()).await?;
            }
        }
        result
    }

    /// Applies a transcoding asset state to a processing recording. Compare-and-set on
    /// `processing`, so webhook replays and monitor reruns are no-ops.
    pub async fn settle_transcoding(
        &self,
        recording_id: Uuid,
        asset: &TranscodingAsset,
    ) -> Result<TranscodeOutcome, EngineError> {
        let (next, patch, outcome) = if asset.is_ready() {
            (
                RecordingStatus::Completed,
                RecordingPatch {
                    playback_id: asset.playback_id().map(str::to_string),
                    duration_seconds: asset.duration_seconds(),
                    ..RecordingPatch::default()
                },
                TranscodeOutcome::Completed,
            )
        } else if asset.is_errored() {
            (
                RecordingStatus::Failed,
                RecordingPatch::error(asset.error_message()),
                TranscodeOutcome::Failed,
            )
        } else {
            return Ok(TranscodeOutcome::Unchanged);
        };

        let changed = self
            .recordings
            .transition(recording_id, next, TransitionSource::Transcoding, patch)
            .await?;
        if changed {
            info!(%recording_id, asset_id = %asset.id, status = next.as_str(), "Transcoding settled");
            Ok(outcome)
        } else {
            Ok(TranscodeOutcome::Unchanged)
        }
    }

    async fn start_transcoding(&self, rec: &recording::Model) -> Result<bool, EngineError> {
        let session_id = rec
            .agent_session_id
            .as_deref()
            .ok_or_else(|| EngineError::validation("recording has no agent session"))?;
        let grant = self
            .grants
            .find_by_user(rec.user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("grant", rec.user_id))?;

        let media = self.notetaker.media(&grant.grant_id, session_id).await?;
        let url = media
            .recording_url()
            .ok_or_else(|| EngineError::validation("agent media has no recording url"))?
            .to_string();

        let asset = self.transcoding.create_asset(&url).await?;
        let changed = self.recordings.attach_media(rec.id, &url, &asset.id).await?;
        info!(asset_id = %asset.id, changed, "Transcoding started");
        Ok(changed)
    }
}
