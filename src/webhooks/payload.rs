//! Webhook payloads as tagged unions. Unknown types deserialize to `Unknown` so new provider
//! notifications are acknowledged instead of rejected.

use serde::Deserialize;

use crate::models::recording::RecordingStatus;
use crate::providers::calendar::ProviderEvent;
use crate::providers::transcoding::TranscodingAsset;

/// `data` block of a calendar-provider delivery.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectData<T> {
    #[serde(default)]
    pub grant_id: Option<String>,
    pub object: T,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeletedEvent {
    pub id: String,
    #[serde(default)]
    pub grant_id: Option<String>,
    #[serde(default)]
    pub master_event_id: Option<String>,
}

/// Agent state change. The provider has used both `status` and `state` for this field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentUpdate {
    pub id: String,
    #[serde(default)]
    pub grant_id: Option<String>,
    #[serde(default, alias = "state")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GrantObject {
    #[serde(default)]
    pub grant_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl GrantObject {
    pub fn grant_id(&self) -> Option<&str> {
        self.grant_id.as_deref().or(self.id.as_deref())
    }
}

/// Calendar-provider and agent deliveries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum CalendarWebhook {
    #[serde(rename = "challenge")]
    Challenge { challenge: String },
    #[serde(rename = "event.created")]
    EventCreated { data: ObjectData<ProviderEvent> },
    #[serde(rename = "event.updated")]
    EventUpdated { data: ObjectData<ProviderEvent> },
    #[serde(rename = "event.deleted")]
    EventDeleted { data: ObjectData<DeletedEvent> },
    #[serde(rename = "notetaker.status_updated")]
    NotetakerStatusUpdated { data: ObjectData<AgentUpdate> },
    #[serde(rename = "notetaker.media_updated")]
    NotetakerMediaUpdated { data: ObjectData<AgentUpdate> },
    #[serde(rename = "grant.created")]
    GrantCreated { data: ObjectData<GrantObject> },
    #[serde(rename = "grant.updated")]
    GrantUpdated { data: ObjectData<GrantObject> },
    #[serde(rename = "grant.deleted")]
    GrantDeleted { data: ObjectData<GrantObject> },
    #[serde(rename = "grant.expired")]
    GrantExpired { data: ObjectData<GrantObject> },
    #[serde(other)]
    Unknown,
}

impl CalendarWebhook {
    /// Provider event id the delivery concerns, for the audit log.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            CalendarWebhook::EventCreated { data } | CalendarWebhook::EventUpdated { data } => {
                data.object.id.as_deref()
            }
            CalendarWebhook::EventDeleted { data } => Some(data.object.id.as_str()),
            _ => None,
        }
    }

    /// Agent session id the delivery concerns, for the audit log.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            CalendarWebhook::NotetakerStatusUpdated { data }
            | CalendarWebhook::NotetakerMediaUpdated { data } => Some(data.object.id.as_str()),
            _ => None,
        }
    }
}

/// Transcoding service deliveries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum TranscodingWebhook {
    #[serde(rename = "video.asset.ready")]
    AssetReady { data: TranscodingAsset },
    #[serde(rename = "video.asset.errored")]
    AssetErrored { data: TranscodingAsset },
    #[serde(rename = "video.asset.deleted")]
    AssetDeleted { data: TranscodingAsset },
    #[serde(other)]
    Unknown,
}

/// How an agent status update should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Status(RecordingStatus),
    /// Captured media is ready to fetch.
    MediaAvailable,
    /// Media is being processed on the agent side.
    MediaProcessing,
}

/// Maps the agent vocabulary onto local statuses. `None` for states we do not track.
pub fn map_agent_status(raw: &str) -> Option<AgentStatus> {
    let status = match raw.trim().to_ascii_lowercase().as_str() {
        "scheduled" | "waiting" | "waiting_for_entry" => RecordingStatus::Waiting,
        "connecting" | "joining" => RecordingStatus::Joining,
        "attending" | "recording" => RecordingStatus::Attending,
        "leaving" | "disconnecting" => RecordingStatus::Leaving,
        "concluded" | "completed" | "ready" => RecordingStatus::Completed,
        "failed" | "failed_entry" | "error" => RecordingStatus::Failed,
        "cancelled" | "canceled" => RecordingStatus::Cancelled,
        "media_available" | "available" => return Some(AgentStatus::MediaAvailable),
        "processing" | "media_processing" => return Some(AgentStatus::MediaProcessing),
        _ => return None,
    };
    Some(AgentStatus::Status(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_and_unknown_types() {
        let created: CalendarWebhook = serde_json::from_value(json!({
            "type": "event.created",
            "data": {"grant_id": "g1", "object": {"id": "evt-1", "title": "Demo"}}
        }))
        .unwrap();
        assert_eq!(created.event_id(), Some("evt-1"));

        let status: CalendarWebhook = serde_json::from_value(json!({
            "type": "notetaker.status_updated",
            "data": {"object": {"id": "nt-1", "state": "concluded"}}
        }))
        .unwrap();
        assert_eq!(status.session_id(), Some("nt-1"));
        match status {
            CalendarWebhook::NotetakerStatusUpdated { data } => {
                assert_eq!(data.object.status.as_deref(), Some("concluded"))
            }
            other => panic!("unexpected {other:?}"),
        }

        let unknown: CalendarWebhook =
            serde_json::from_value(json!({"type": "folder.created", "data": {}})).unwrap();
        assert_eq!(unknown, CalendarWebhook::Unknown);
    }

    #[test]
    fn parses_challenges() {
        let challenge: CalendarWebhook =
            serde_json::from_value(json!({"type": "challenge", "challenge": "abc"})).unwrap();
        assert_eq!(
            challenge,
            CalendarWebhook::Challenge {
                challenge: "abc".to_string()
            }
        );
    }

    #[test]
    fn maps_agent_vocabulary() {
        assert_eq!(
            map_agent_status("concluded"),
            Some(AgentStatus::Status(RecordingStatus::Completed))
        );
        assert_eq!(
            map_agent_status("ready"),
            Some(AgentStatus::Status(RecordingStatus::Completed))
        );
        assert_eq!(
            map_agent_status("error"),
            Some(AgentStatus::Status(RecordingStatus::Failed))
        );
        assert_eq!(
            map_agent_status("Connecting"),
            Some(AgentStatus::Status(RecordingStatus::Joining))
        );
        assert_eq!(map_agent_status("media_available"), Some(AgentStatus::MediaAvailable));
        assert_eq!(map_agent_status("teleporting"), None);
    }

    #[test]
    fn parses_transcoding_events() {
        let ready: TranscodingWebhook = serde_json::from_value(json!({
            "type": "video.asset.ready",
            "object": {"type": "asset", "id": "asset-1"},
            "data": {"id": "asset-1", "status": "ready", "playback_ids": [{"id": "p1"}], "duration": 12.4}
        }))
        .unwrap();
        match ready {
            TranscodingWebhook::AssetReady { data } => assert_eq!(data.playback_id(), Some("p1")),
            other => panic!("unexpected {other:?}"),
        }

        let other: TranscodingWebhook =
            serde_json::from_value(json!({"type": "video.upload.created", "data": {}})).unwrap();
        assert_eq!(other, TranscodingWebhook::Unknown);
    }
}
