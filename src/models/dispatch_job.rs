//! DispatchJob entity model
//!
//! A delayed "dispatch this event's agent at time T" message. Removed on success, kept as
//! `failed` once its retry budget is spent.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DispatchJobStatus {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl DispatchJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchJobStatus::Queued => "queued",
            DispatchJobStatus::Running => "running",
            DispatchJobStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = DispatchJob)]
#[sea_orm(table_name = "dispatch_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    /// Provider grant captured at enqueue time
    pub grant_id: String,
    /// Earliest instant the job may be claimed
    #[schema(value_type = String, format = DateTime)]
    pub scheduled_for: DateTimeWithTimeZone,
    pub status: DispatchJobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    /// Backoff gate set after a failed attempt
    #[schema(value_type = Option<String>, format = DateTime)]
    pub retry_after: Option<DateTimeWithTimeZone>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<DateTimeWithTimeZone>,
    /// Structured details of the most recent failure
    #[sea_orm(column_type = "JsonBinary", nullable)]
    #[schema(value_type = Option<Object>)]
    pub last_error: Option<JsonValue>,
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
        on_delete = "Cascade"
    )]
    Event,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
