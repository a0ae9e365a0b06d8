//! # Recording Repository
//!
//! Every status change is a compare-and-set against the statuses the transition table allows,
//! so replays and out-of-order deliveries degrade to no-ops.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::map_db_err;
use crate::error::{EngineError, is_unique_violation};
use crate::models::recording::{
    ActiveModel, Column, Entity, Model, RecordingStatus, TransitionSource,
};

/// Optional column updates applied together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingPatch {
    pub media_url: Option<String>,
    pub transcoding_asset_id: Option<String>,
    pub playback_id: Option<String>,
    pub duration_seconds: Option<i32>,
    pub last_error: Option<String>,
}

impl RecordingPatch {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(message.into()),
            ..Self::default()
        }
    }

    fn columns(self) -> Vec<(Column, SimpleExpr)> {
        let mut columns = Vec::new();
        if let Some(url) = self.media_url {
            columns.push((Column::MediaUrl, Expr::value(url)));
        }
        if let Some(asset) = self.transcoding_asset_id {
            columns.push((Column::TranscodingAssetId, Expr::value(asset)));
        }
        if let Some(playback) = self.playback_id {
            columns.push((Column::PlaybackId, Expr::value(playback)));
        }
        if let Some(duration) = self.duration_seconds {
            columns.push((Column::DurationSeconds, Expr::value(duration)));
        }
        if let Some(message) = self.last_error {
            columns.push((Column::LastError, Expr::value(message)));
        }
        columns
    }
}

fn status_values(statuses: Vec<RecordingStatus>) -> Vec<&'static str> {
    statuses.into_iter().map(RecordingStatus::as_str).collect()
}

/// Repository for recording database operations
#[derive(Clone)]
pub struct RecordingRepository {
    db: DatabaseConnection,
}

impl RecordingRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, EngineError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load recording"))
    }

    /// The single non-terminal recording for an event, if any.
    pub async fn find_active_for_event(&self, event_id: Uuid) -> Result<Option<Model>, EngineError> {
        Entity::find()
            .filter(Column::EventId.eq(event_id))
            .filter(Column::Status.is_in(status_values(RecordingStatus::active())))
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load active recording"))
    }

    pub async fn list_for_event(&self, event_id: Uuid) -> Result<Vec<Model>, EngineError> {
        Entity::find()
            .filter(Column::EventId.eq(event_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list recordings for event"))
    }

    pub async fn find_by_session(&self, session_id: &str) -> Result<Vec<Model>, EngineError> {
        Entity::find()
            .filter(Column::AgentSessionId.eq(session_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to load recordings by session"))
    }

    pub async fn find_by_asset(&self, asset_id: &str) -> Result<Vec<Model>, EngineError> {
        Entity::find()
            .filter(Column::TranscodingAssetId.eq(asset_id))
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to load recordings by asset"))
    }

    /// Inserts a freshly dispatched recording. Fails with [`EngineError::Conflict`] when the
    /// event already has an active recording.
    pub async fn insert_waiting(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        session_id: &str,
        join_time: Option<DateTime<Utc>>,
    ) -> Result<Model, EngineError> {
        self.insert(user_id, event_id, session_id, join_time, RecordingStatus::Waiting, None)
            .await
    }

    /// Records an agent that lost a dispatch race so it is never silently orphaned.
    pub async fn insert_superseded(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        session_id: &str,
        join_time: Option<DateTime<Utc>>,
    ) -> Result<Model, EngineError> {
        self.insert(
            user_id,
            event_id,
            session_id,
            join_time,
            RecordingStatus::Cancelled,
            Some("superseded by a concurrent dispatch".to_string()),
        )
        .await
    }

    async fn insert(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        session_id: &str,
        join_time: Option<DateTime<Utc>>,
        status: RecordingStatus,
        last_error: Option<String>,
    ) -> Result<Model, EngineError> {
        let now = Utc::now().fixed_offset();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            event_id: Set(Some(event_id)),
            agent_session_id: Set(Some(session_id.to_string())),
            status: Set(status),
            scheduled_join_time: Set(join_time.map(|t| t.fixed_offset())),
            media_url: Set(None),
            transcoding_asset_id: Set(None),
            playback_id: Set(None),
            duration_seconds: Set(None),
            last_error: Set(last_error),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(&self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                EngineError::Conflict(format!("event {event_id} already has an active recording"))
            } else {
                map_db_err("Failed to insert recording")(err)
            }
        })
    }

    /// Moves a recording to `next` if the transition table allows it from the current status.
    /// Returns whether a row changed.
    pub async fn transition(
        &self,
        id: Uuid,
        next: RecordingStatus,
        source: TransitionSource,
        patch: RecordingPatch,
    ) -> Result<bool, EngineError> {
        let allowed = RecordingStatus::predecessors(next, source);
        if allowed.is_empty() {
            return Ok(false);
        }

        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(next.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()));
        for (column, value) in patch.columns() {
            update = update.col_expr(column, value);
        }

        let mut guard = Condition::all()
            .add(Column::Id.eq(id))
            .add(Column::Status.is_in(status_values(allowed)));
        if next == RecordingStatus::Retrieving {
            // a processing row only goes back for media when nothing was ever transcoded
            guard = guard.add(
                Condition::any()
                    .add(Column::Status.ne(RecordingStatus::Processing.as_str()))
                    .add(Column::TranscodingAssetId.is_null()),
            );
        }

        let result = update
            .filter(guard)
            .exec(&self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    EngineError::Conflict(format!(
                        "recording {id} cannot become {} while another is active",
                        next.as_str()
                    ))
                } else {
                    map_db_err("Failed to transition recording")(err)
                }
            })?;

        Ok(result.rows_affected > 0)
    }

    /// Stores the fetched media and its transcoding asset, leaving the recording in processing.
    ///
    /// Accepts a row an early `processing` notice already moved on, as long as no asset is
    /// attached yet.
    pub async fn attach_media(&self, id: Uuid, media_url: &str, asset_id: &str) -> Result<bool, EngineError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(RecordingStatus::Processing.as_str()))
            .col_expr(Column::MediaUrl, Expr::value(media_url))
            .col_expr(Column::TranscodingAssetId, Expr::value(asset_id))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(status_values(vec![
                RecordingStatus::Retrieving,
                RecordingStatus::Processing,
            ])))
            .filter(Column::TranscodingAssetId.is_null())
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to attach recording media"))?;
        Ok(result.rows_affected > 0)
    }

    pub async fn update_join_time(&self, id: Uuid, join_time: DateTime<Utc>) -> Result<bool, EngineError> {
        let result = Entity::update_many()
            .col_expr(Column::ScheduledJoinTime, Expr::value(join_time.fixed_offset()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(RecordingStatus::Waiting.as_str()))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to update recording join time"))?;
        Ok(result.rows_affected > 0)
    }

    /// Stores an error message without touching status.
    pub async fn record_error(&self, id: Uuid, message: &str) -> Result<(), EngineError> {
        Entity::update_many()
            .col_expr(Column::LastError, Expr::value(message))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to record recording error"))?;
        Ok(())
    }

    /// Drops transcoding references after the asset is deleted upstream.
    pub async fn clear_asset(&self, asset_id: &str) -> Result<u64, EngineError> {
        let result = Entity::update_many()
            .col_expr(Column::TranscodingAssetId, Expr::value(Option::<String>::None))
            .col_expr(Column::PlaybackId, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::TranscodingAssetId.eq(asset_id))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to clear transcoding asset"))?;
        Ok(result.rows_affected)
    }

    /// Re-homes recordings from a duplicate event row onto the row that survives dedup.
    pub async fn reassign_event(&self, from_event: Uuid, to_event: Uuid) -> Result<u64, EngineError> {
        let result = Entity::update_many()
            .col_expr(Column::EventId, Expr::value(to_event))
            .filter(Column::EventId.eq(from_event))
            .exec(&self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    EngineError::Conflict(format!(
                        "events {from_event} and {to_event} both have active recordings"
                    ))
                } else {
                    map_db_err("Failed to reassign recordings")(err)
                }
            })?;
        Ok(result.rows_affected)
    }

    /// Processing recordings untouched for longer than `stale_after` that have an asset.
    pub async fn list_stalled_processing(
        &self,
        stale_after: Duration,
        limit: u64,
    ) -> Result<Vec<Model>, EngineError> {
        let cutoff = (Utc::now() - stale_after).fixed_offset();
        Entity::find()
            .filter(Column::Status.eq(RecordingStatus::Processing.as_str()))
            .filter(Column::UpdatedAt.lt(cutoff))
            .filter(Column::TranscodingAssetId.is_not_null())
            .order_by_asc(Column::UpdatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list stalled recordings"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::event::{EventRepository, NewEvent};
    use chrono::TimeZone;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> (RecordingRepository, Uuid, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let user = Uuid::new_v4();
        let event = EventRepository::new(db.clone())
            .upsert(
                user,
                &NewEvent {
                    provider_event_id: "evt-1".to_string(),
                    calendar_uid: "uid-1".to_string(),
                    title: "Demo".to_string(),
                    description: None,
                    location: None,
                    start_time: Utc.with_ymd_and_hms(2026, 11, 2, 15, 0, 0).unwrap(),
                    end_time: Utc.with_ymd_and_hms(2026, 11, 2, 16, 0, 0).unwrap(),
                    conference_url: Some("https://meet".to_string()),
                    organizer: None,
                    participants: vec![],
                    master_event_id: None,
                    original_start_time: None,
                    recurrence: None,
                    last_updated: 1,
                },
            )
            .await
            .unwrap();
        (RecordingRepository::new(db), user, event.model().id)
    }

    #[tokio::test]
    async fn only_one_active_recording_per_event() {
        let (repo, user, event) = setup().await;
        repo.insert_waiting(user, event, "n1", None).await.unwrap();

        let second = repo.insert_waiting(user, event, "n2", None).await;
        assert!(matches!(second, Err(EngineError::Conflict(_))));

        // Terminal rows do not count against the guard.
        repo.insert_superseded(user, event, "n2", None).await.unwrap();
        assert_eq!(repo.list_for_event(event).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transitions_are_compare_and_set() {
        let (repo, user, event) = setup().await;
        let rec = repo.insert_waiting(user, event, "n1", None).await.unwrap();

        assert!(
            repo.transition(rec.id, RecordingStatus::Attending, TransitionSource::Agent, RecordingPatch::default())
                .await
                .unwrap()
        );
        // Stale "joining" after "attending" is ignored.
        assert!(
            !repo
                .transition(rec.id, RecordingStatus::Joining, TransitionSource::Agent, RecordingPatch::default())
                .await
                .unwrap()
        );
        assert!(
            repo.transition(rec.id, RecordingStatus::Completed, TransitionSource::Agent, RecordingPatch::default())
                .await
                .unwrap()
        );
        assert!(
            !repo
                .transition(rec.id, RecordingStatus::Completed, TransitionSource::Agent, RecordingPatch::default())
                .await
                .unwrap()
        );

        let stored = repo.find_by_id(rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordingStatus::Completed);
        assert!(repo.find_active_for_event(event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patch_columns_are_written_with_transition() {
        let (repo, user, event) = setup().await;
        let rec = repo.insert_waiting(user, event, "n1", None).await.unwrap();
        repo.transition(rec.id, RecordingStatus::Attending, TransitionSource::Agent, RecordingPatch::default())
            .await
            .unwrap();

        let changed = repo
            .transition(
                rec.id,
                RecordingStatus::Processing,
                TransitionSource::Media,
                RecordingPatch {
                    media_url: Some("https://media/1.mp4".to_string()),
                    transcoding_asset_id: Some("asset-1".to_string()),
                    ..RecordingPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(changed);

        let found = repo.find_by_asset("asset-1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].media_url.as_deref(), Some("https://media/1.mp4"));

        assert_eq!(repo.clear_asset("asset-1").await.unwrap(), 1);
        assert!(repo.find_by_asset("asset-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn early_processing_notice_does_not_block_media_retrieval() {
        let (repo, user, event) = setup().await;
        let rec = repo.insert_waiting(user, event, "n1", None).await.unwrap();
        repo.transition(rec.id, RecordingStatus::Attending, TransitionSource::Agent, RecordingPatch::default())
            .await
            .unwrap();
        assert!(
            repo.transition(rec.id, RecordingStatus::Processing, TransitionSource::Media, RecordingPatch::default())
                .await
                .unwrap()
        );

        assert!(
            repo.transition(rec.id, RecordingStatus::Retrieving, TransitionSource::Media, RecordingPatch::default())
                .await
                .unwrap()
        );
        assert!(repo.attach_media(rec.id, "https://media/1.mp4", "asset-1").await.unwrap());
        // Once an asset is attached the row stays with the transcoder.
        assert!(!repo.attach_media(rec.id, "https://media/2.mp4", "asset-2").await.unwrap());
        assert!(
            !repo
                .transition(rec.id, RecordingStatus::Retrieving, TransitionSource::Media, RecordingPatch::default())
                .await
                .unwrap()
        );

        let stored = repo.find_by_id(rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordingStatus::Processing);
        assert_eq!(stored.transcoding_asset_id.as_deref(), Some("asset-1"));
        assert_eq!(stored.media_url.as_deref(), Some("https://media/1.mp4"));
    }
}
