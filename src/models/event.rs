//! Event entity model
//!
//! One row per occurrence of a calendar meeting, mirrored from the calendar provider.

use sea_orm::ActiveModelBehavior;
use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A meeting organizer or attendee.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, FromJsonQueryResult)]
pub struct Participant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Ordered attendee list stored as JSON.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ParticipantList(pub Vec<Participant>);

/// Recurrence rule strings (RRULE/EXDATE lines) carried by series masters.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct RecurrenceRules(pub Vec<String>);

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    /// Provider-assigned event id, unique per user
    pub provider_event_id: String,

    /// Dedup key, stable across provider-side edits
    pub calendar_uid: String,

    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,

    pub start_time: DateTimeWithTimeZone,
    pub end_time: DateTimeWithTimeZone,

    /// Join link; events without one are never recorded
    pub conference_url: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub organizer: Option<Participant>,

    #[sea_orm(column_type = "JsonBinary")]
    pub participants: ParticipantList,

    /// Provider id of the series master when this row is a recurring instance
    pub master_event_id: Option<String>,

    /// Set when an instance was individually moved away from its series slot
    pub original_start_time: Option<DateTimeWithTimeZone>,

    /// Present only on series masters
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub recurrence: Option<RecurrenceRules>,

    /// Last-updated watermark in epoch seconds
    pub last_updated: i64,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_master(&self) -> bool {
        self.recurrence.as_ref().is_some_and(|rules| !rules.0.is_empty())
    }

    pub fn is_instance(&self) -> bool {
        self.master_event_id.is_some()
    }

    pub fn has_conference_url(&self) -> bool {
        self.conference_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recording::Entity")]
    Recording,
    #[sea_orm(has_many = "super::dispatch_job::Entity")]
    DispatchJob,
}

impl Related<super::recording::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recording.def()
    }
}

impl Related<super::dispatch_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DispatchJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
