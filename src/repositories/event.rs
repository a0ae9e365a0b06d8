//! # Event Repository
//!
//! Typed upsert/read operations for the events table, keyed by (user, provider event id) and
//! by calendar UID. Writes are last-writer-wins on the `last_updated` watermark.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use super::map_db_err;
use crate::error::{EngineError, is_unique_violation};
use crate::models::event::{
    ActiveModel, Column, Entity, Model, Participant, ParticipantList, RecurrenceRules,
};

/// A validated, normalized event ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub provider_event_id: String,
    pub calendar_uid: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub conference_url: Option<String>,
    pub organizer: Option<Participant>,
    pub participants: Vec<Participant>,
    pub master_event_id: Option<String>,
    pub original_start_time: Option<DateTime<Utc>>,
    pub recurrence: Option<Vec<String>>,
    pub last_updated: i64,
}

impl NewEvent {
    pub fn is_master(&self) -> bool {
        self.recurrence.as_ref().is_some_and(|rules| !rules.is_empty())
    }

    pub fn is_instance(&self) -> bool {
        self.master_event_id.is_some()
    }
}

/// What an upsert did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(Model),
    Updated { previous: Model, current: Model },
    /// Incoming watermark was not newer than the stored row.
    Stale(Model),
}

impl UpsertOutcome {
    pub fn model(&self) -> &Model {
        match self {
            UpsertOutcome::Inserted(model)
            | UpsertOutcome::Updated { current: model, .. }
            | UpsertOutcome::Stale(model) => model,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, UpsertOutcome::Stale(_))
    }
}

/// Repository for event database operations
#[derive(Clone)]
pub struct EventRepository {
    db: DatabaseConnection,
}

impl EventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, EngineError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load event"))
    }

    pub async fn find_by_provider_id(
        &self,
        user_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<Model>, EngineError> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::ProviderEventId.eq(provider_event_id))
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load event by provider id"))
    }

    /// Most recently updated row carrying `calendar_uid`.
    pub async fn find_by_calendar_uid(
        &self,
        user_id: Uuid,
        calendar_uid: &str,
    ) -> Result<Option<Model>, EngineError> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::CalendarUid.eq(calendar_uid))
            .order_by_desc(Column::LastUpdated)
            .order_by_desc(Column::UpdatedAt)
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load event by calendar uid"))
    }

    /// All rows carrying `calendar_uid`, freshest first.
    pub async fn list_by_calendar_uid(
        &self,
        user_id: Uuid,
        calendar_uid: &str,
    ) -> Result<Vec<Model>, EngineError> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::CalendarUid.eq(calendar_uid))
            .order_by_desc(Column::LastUpdated)
            .order_by_desc(Column::UpdatedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list events by calendar uid"))
    }

    pub async fn list_instances(
        &self,
        user_id: Uuid,
        master_provider_id: &str,
    ) -> Result<Vec<Model>, EngineError> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::MasterEventId.eq(master_provider_id))
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list recurring instances"))
    }

    /// Looks up the stored row for `event` (by calendar UID, then provider id) and writes it
    /// when absent or strictly newer.
    pub async fn upsert(&self, user_id: Uuid, event: &NewEvent) -> Result<UpsertOutcome, EngineError> {
        let existing = match self.find_by_calendar_uid(user_id, &event.calendar_uid).await? {
            Some(row) => Some(row),
            None => {
                self.find_by_provider_id(user_id, &event.provider_event_id)
                    .await?
            }
        };

        match existing {
            Some(row) => self.update_if_newer(row, event).await,
            None => match self.insert(user_id, event).await {
                Ok(model) => Ok(UpsertOutcome::Inserted(model)),
                Err(EngineError::Conflict(_)) => {
                    // A concurrent writer inserted the same provider id first.
                    let row = self
                        .find_by_provider_id(user_id, &event.provider_event_id)
                        .await?
                        .ok_or_else(|| EngineError::not_found("event", &event.provider_event_id))?;
                    self.update_if_newer(row, event).await
                }
                Err(err) => Err(err),
            },
        }
    }

    async fn insert(&self, user_id: Uuid, event: &NewEvent) -> Result<Model, EngineError> {
        let now = Utc::now().fixed_offset();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider_event_id: Set(event.provider_event_id.clone()),
            calendar_uid: Set(event.calendar_uid.clone()),
            title: Set(event.title.clone()),
            description: Set(event.description.clone()),
            location: Set(event.location.clone()),
            start_time: Set(event.start_time.fixed_offset()),
            end_time: Set(event.end_time.fixed_offset()),
            conference_url: Set(event.conference_url.clone()),
            organizer: Set(event.organizer.clone()),
            participants: Set(ParticipantList(event.participants.clone())),
            master_event_id: Set(event.master_event_id.clone()),
            original_start_time: Set(event.original_start_time.map(|t| t.fixed_offset())),
            recurrence: Set(recurrence_column(event)),
            last_updated: Set(event.last_updated),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(&self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                EngineError::Conflict(format!(
                    "event {} already stored for user",
                    event.provider_event_id
                ))
            } else {
                map_db_err("Failed to insert event")(err)
            }
        })
    }

    /// Compare-and-set on the watermark: only a strictly newer payload may overwrite.
    async fn update_if_newer(&self, row: Model, event: &NewEvent) -> Result<UpsertOutcome, EngineError> {
        if event.last_updated <= row.last_updated {
            return Ok(UpsertOutcome::Stale(row));
        }

        let result = Entity::update_many()
            .col_expr(Column::ProviderEventId, Expr::value(event.provider_event_id.clone()))
            .col_expr(Column::Title, Expr::value(event.title.clone()))
            .col_expr(Column::Description, Expr::value(event.description.clone()))
            .col_expr(Column::Location, Expr::value(event.location.clone()))
            .col_expr(Column::StartTime, Expr::value(event.start_time.fixed_offset()))
            .col_expr(Column::EndTime, Expr::value(event.end_time.fixed_offset()))
            .col_expr(Column::ConferenceUrl, Expr::value(event.conference_url.clone()))
            .col_expr(Column::Organizer, Expr::value(event.organizer.clone()))
            .col_expr(
                Column::Participants,
                Expr::value(ParticipantList(event.participants.clone())),
            )
            .col_expr(Column::MasterEventId, Expr::value(event.master_event_id.clone()))
            .col_expr(
                Column::OriginalStartTime,
                Expr::value(event.original_start_time.map(|t| t.fixed_offset())),
            )
            .col_expr(Column::Recurrence, Expr::value(recurrence_column(event)))
            .col_expr(Column::LastUpdated, Expr::value(event.last_updated))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(row.id))
            .filter(Column::LastUpdated.lt(event.last_updated))
            .exec(&self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    EngineError::Conflict(format!(
                        "provider event id {} belongs to another row",
                        event.provider_event_id
                    ))
                } else {
                    map_db_err("Failed to update event")(err)
                }
            })?;

        let current = self
            .find_by_id(row.id)
            .await?
            .ok_or_else(|| EngineError::not_found("event", row.id))?;

        if result.rows_affected == 0 {
            // A newer write landed between our read and the conditional update.
            return Ok(UpsertOutcome::Stale(current));
        }

        Ok(UpsertOutcome::Updated {
            previous: row,
            current,
        })
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        let result = Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to delete event"))?;
        Ok(result.rows_affected > 0)
    }

    /// Instances whose series master row is missing or no longer carries a recurrence.
    pub async fn list_orphan_instances(&self, user_id: Option<Uuid>) -> Result<Vec<Model>, EngineError> {
        let mut instances = Entity::find().filter(Column::MasterEventId.is_not_null());
        let mut masters = Entity::find()
            .select_only()
            .column(Column::UserId)
            .column(Column::ProviderEventId)
            .filter(Column::Recurrence.is_not_null());
        if let Some(user_id) = user_id {
            instances = instances.filter(Column::UserId.eq(user_id));
            masters = masters.filter(Column::UserId.eq(user_id));
        }

        let masters: HashSet<(Uuid, String)> = masters
            .into_tuple::<(Uuid, String)>()
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list recurring masters"))?
            .into_iter()
            .collect();

        let instances = instances
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list recurring instances"))?;

        Ok(instances
            .into_iter()
            .filter(|instance| {
                instance.master_event_id.as_ref().is_some_and(|master| {
                    !masters.contains(&(instance.user_id, master.clone()))
                })
            })
            .collect())
    }

    /// (user, calendar UID) pairs stored more than once.
    pub async fn duplicate_calendar_uids(
        &self,
        user_id: Option<Uuid>,
    ) -> Result<Vec<(Uuid, String)>, EngineError> {
        let mut query = Entity::find()
            .select_only()
            .column(Column::UserId)
            .column(Column::CalendarUid)
            .group_by(Column::UserId)
            .group_by(Column::CalendarUid)
            .having(Expr::expr(Expr::col(Column::Id).count()).gt(1));
        if let Some(user_id) = user_id {
            query = query.filter(Column::UserId.eq(user_id));
        }

        query
            .into_tuple::<(Uuid, String)>()
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to find duplicate calendar uids"))
    }
}

fn recurrence_column(event: &NewEvent) -> Option<RecurrenceRules> {
    event
        .recurrence
        .as_ref()
        .filter(|rules| !rules.is_empty())
        .map(|rules| RecurrenceRules(rules.clone()))
}
