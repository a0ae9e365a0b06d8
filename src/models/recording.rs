//! Recording entity model
//!
//! One attempted or completed capture of a meeting. `status` mirrors the remote agent and the
//! transcoding pipeline; every change goes through [`RecordingStatus::can_transition`].

use sea_orm::ActiveModelBehavior;
use sea_orm::Iterable;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    #[sea_orm(string_value = "waiting")]
    Waiting,
    #[sea_orm(string_value = "joining")]
    Joining,
    #[sea_orm(string_value = "attending")]
    Attending,
    #[sea_orm(string_value = "leaving")]
    Leaving,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "retrieving")]
    Retrieving,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Who is asking for a status change. Each source owns a slice of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    /// Agent status webhooks.
    Agent,
    /// Agent media webhooks and media retrieval.
    Media,
    /// Transcoding webhooks and the stalled-recording monitor.
    Transcoding,
    /// Local cancellation.
    Cancellation,
}

impl RecordingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordingStatus::Waiting => "waiting",
            RecordingStatus::Joining => "joining",
            RecordingStatus::Attending => "attending",
            RecordingStatus::Leaving => "leaving",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Retrieving => "retrieving",
            RecordingStatus::Processing => "processing",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecordingStatus::Completed | RecordingStatus::Failed | RecordingStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses counted by the one-active-recording-per-event index.
    pub fn active() -> Vec<RecordingStatus> {
        RecordingStatus::iter().filter(|s| s.is_active()).collect()
    }

    fn agent_rank(self) -> Option<u8> {
        match self {
            RecordingStatus::Waiting => Some(0),
            RecordingStatus::Joining => Some(1),
            RecordingStatus::Attending => Some(2),
            RecordingStatus::Leaving => Some(3),
            RecordingStatus::Completed => Some(4),
            _ => None,
        }
    }

    /// Whether `source` may move a recording from `self` to `next`.
    ///
    /// Same-state requests are rejected so replays become no-ops. Media may arrive before the
    /// agent reports the end of the call, or after an early `processing` notice; the repository
    /// only lets `processing -> retrieving` through while no asset is attached.
    pub fn can_transition(self, next: RecordingStatus, source: TransitionSource) -> bool {
        use RecordingStatus::*;

        if self == next {
            return false;
        }

        match (source, next) {
            (TransitionSource::Agent, Failed) => self.is_active(),
            (TransitionSource::Agent, _) => match (self.agent_rank(), next.agent_rank()) {
                (Some(from), Some(to)) => from < to,
                _ => false,
            },
            (TransitionSource::Media, Retrieving) => {
                matches!(self, Waiting | Joining | Attending | Leaving | Completed | Processing)
            }
            (TransitionSource::Media, Processing) => {
                matches!(self, Attending | Leaving | Completed | Retrieving)
            }
            (TransitionSource::Media, Failed) => matches!(self, Retrieving | Processing),
            (TransitionSource::Media, _) => false,
            (TransitionSource::Transcoding, Completed | Failed) => self == Processing,
            (TransitionSource::Transcoding, _) => false,
            (TransitionSource::Cancellation, Cancelled) => self.is_active() || self == Failed,
            (TransitionSource::Cancellation, _) => false,
        }
    }

    /// Every status from which `source` may reach `next`; used as the compare-and-set guard.
    pub fn predecessors(next: RecordingStatus, source: TransitionSource) -> Vec<RecordingStatus> {
        RecordingStatus::iter()
            .filter(|from| from.can_transition(next, source))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Recording)]
#[sea_orm(table_name = "recordings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    /// Cleared when the event row is deleted; the recording history survives
    pub event_id: Option<Uuid>,
    /// Remote agent session id, set once dispatch succeeds
    pub agent_session_id: Option<String>,
    pub status: RecordingStatus,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub scheduled_join_time: Option<DateTimeWithTimeZone>,
    pub media_url: Option<String>,
    pub transcoding_asset_id: Option<String>,
    pub playback_id: Option<String>,
    pub duration_seconds: Option<i32>,
    pub last_error: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id",
        on_delete = "SetNull"
    )]
    Event,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
