//! # Dispatch Job Repository
//!
//! Queue operations for delayed dispatches. Claiming is a two-step select then conditional
//! update inside one transaction, so two workers never run the same job.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::map_db_err;
use crate::error::{EngineError, is_unique_violation};
use crate::models::dispatch_job::{ActiveModel, Column, DispatchJobStatus, Entity, Model};

const PENDING: [&str; 2] = ["queued", "running"];

/// Repository for dispatch job database operations
#[derive(Clone)]
pub struct DispatchJobRepository {
    db: DatabaseConnection,
}

impl DispatchJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, EngineError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load dispatch job"))
    }

    /// The queued or running job for an event, if any.
    pub async fn find_pending_for_event(&self, event_id: Uuid) -> Result<Option<Model>, EngineError> {
        Entity::find()
            .filter(Column::EventId.eq(event_id))
            .filter(Column::Status.is_in(PENDING))
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load pending dispatch job"))
    }

    /// Queues a dispatch for `scheduled_for`. While a job is pending for the event the existing
    /// row is returned instead; a still-queued job adopts the new time.
    pub async fn enqueue(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        grant_id: &str,
        scheduled_for: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Model, EngineError> {
        if let Some(existing) = self.find_pending_for_event(event_id).await? {
            return self.adopt_schedule(existing, scheduled_for).await;
        }

        let now = Utc::now().fixed_offset();
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            event_id: Set(event_id),
            grant_id: Set(grant_id.to_string()),
            scheduled_for: Set(scheduled_for.fixed_offset()),
            status: Set(DispatchJobStatus::Queued),
            attempts: Set(0),
            max_attempts: Set(max_attempts),
            retry_after: Set(None),
            started_at: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match job.insert(&self.db).await {
            Ok(model) => Ok(model),
            Err(err) if is_unique_violation(&err) => {
                // Lost a race with another enqueue for the same event.
                self.find_pending_for_event(event_id)
                    .await?
                    .ok_or_else(|| EngineError::Conflict(format!("dispatch job for event {event_id} vanished")))
            }
            Err(err) => Err(map_db_err("Failed to enqueue dispatch job")(err)),
        }
    }

    async fn adopt_schedule(&self, existing: Model, scheduled_for: DateTime<Utc>) -> Result<Model, EngineError> {
        if existing.status != DispatchJobStatus::Queued
            || existing.scheduled_for == scheduled_for.fixed_offset()
        {
            return Ok(existing);
        }

        let mut active: ActiveModel = existing.into();
        active.scheduled_for = Set(scheduled_for.fixed_offset());
        active.updated_at = Set(Utc::now().fixed_offset());
        active
            .update(&self.db)
            .await
            .map_err(map_db_err("Failed to reschedule dispatch job"))
    }

    /// Atomically claims up to `batch` due jobs: queued, scheduled, and past any backoff gate.
    pub async fn claim_due(&self, batch: u64) -> Result<Vec<Model>, EngineError> {
        let now = Utc::now().fixed_offset();
        let txn = self
            .db
            .begin()
            .await
            .map_err(map_db_err("Failed to open claim transaction"))?;

        let eligible: Vec<Uuid> = Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Status.eq(DispatchJobStatus::Queued.as_str()))
            .filter(Column::ScheduledFor.lte(now))
            .filter(Column::RetryAfter.is_null().or(Column::RetryAfter.lte(now)))
            .order_by_asc(Column::ScheduledFor)
            .limit(batch)
            .into_tuple::<Uuid>()
            .all(&txn)
            .await
            .map_err(map_db_err("Failed to select due dispatch jobs"))?;

        if eligible.is_empty() {
            txn.commit()
                .await
                .map_err(map_db_err("Failed to commit claim transaction"))?;
            return Ok(Vec::new());
        }

        Entity::update_many()
            .col_expr(Column::Status, Expr::value(DispatchJobStatus::Running.as_str()))
            .col_expr(Column::StartedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .filter(Column::Id.is_in(eligible.clone()))
            .filter(Column::Status.eq(DispatchJobStatus::Queued.as_str()))
            .exec(&txn)
            .await
            .map_err(map_db_err("Failed to claim dispatch jobs"))?;

        let claimed = Entity::find()
            .filter(Column::Id.is_in(eligible))
            .filter(Column::Status.eq(DispatchJobStatus::Running.as_str()))
            .filter(Column::StartedAt.eq(now))
            .order_by_asc(Column::ScheduledFor)
            .all(&txn)
            .await
            .map_err(map_db_err("Failed to load claimed dispatch jobs"))?;

        txn.commit()
            .await
            .map_err(map_db_err("Failed to commit claim transaction"))?;
        Ok(claimed)
    }

    /// Removes a job after a successful dispatch or when it became moot.
    pub async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        let result = Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to delete dispatch job"))?;
        Ok(result.rows_affected > 0)
    }

    /// Puts a running job back in the queue behind a backoff gate.
    pub async fn schedule_retry(
        &self,
        id: Uuid,
        retry_after: DateTime<Utc>,
        error: JsonValue,
    ) -> Result<bool, EngineError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(DispatchJobStatus::Queued.as_str()))
            .col_expr(Column::RetryAfter, Expr::value(retry_after.fixed_offset()))
            .col_expr(Column::LastError, Expr::value(error))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(DispatchJobStatus::Running.as_str()))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to schedule dispatch retry"))?;
        Ok(result.rows_affected > 0)
    }

    /// Parks a job whose retry budget is spent.
    pub async fn mark_failed(&self, id: Uuid, error: JsonValue) -> Result<bool, EngineError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(DispatchJobStatus::Failed.as_str()))
            .col_expr(Column::LastError, Expr::value(error))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(DispatchJobStatus::Running.as_str()))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to mark dispatch job failed"))?;
        Ok(result.rows_affected > 0)
    }

    /// Drops queued jobs for an event whose agent is already reporting status.
    pub async fn supersede_pending_for_event(&self, event_id: Uuid) -> Result<u64, EngineError> {
        let result = Entity::delete_many()
            .filter(Column::EventId.eq(event_id))
            .filter(Column::Status.eq(DispatchJobStatus::Queued.as_str()))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to supersede dispatch jobs"))?;
        Ok(result.rows_affected)
    }

    /// Returns jobs stuck in `running` for longer than `max_run` to the queue.
    pub async fn requeue_stuck(&self, max_run: Duration) -> Result<u64, EngineError> {
        let now = Utc::now();
        let cutoff = (now - max_run).fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(DispatchJobStatus::Queued.as_str()))
            .col_expr(Column::StartedAt, Expr::value(Option::<DateTime<chrono::FixedOffset>>::None))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Status.eq(DispatchJobStatus::Running.as_str()))
            .filter(Column::StartedAt.lt(cutoff))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to requeue stuck dispatch jobs"))?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::event::{EventRepository, NewEvent};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    async fn setup() -> (DispatchJobRepository, Uuid, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let event = EventRepository::new(db.clone())
            .upsert(
                user,
                &NewEvent {
                    provider_event_id: "evt-1".to_string(),
                    calendar_uid: "uid-1".to_string(),
                    title: "Demo".to_string(),
                    description: None,
                    location: None,
                    start_time: now + Duration::hours(1),
                    end_time: now + Duration::hours(2),
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
        (DispatchJobRepository::new(db), user, event.model().id)
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_event() {
        let (repo, user, event) = setup().await;
        let first = repo
            .enqueue(user, event, "grant-1", Utc::now() + Duration::minutes(5), 5)
            .await
            .unwrap();
        let later = Utc::now() + Duration::minutes(10);
        let second = repo.enqueue(user, event, "grant-1", later, 5).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.scheduled_for, later.fixed_offset());
    }

    #[tokio::test]
    async fn claims_only_due_jobs_once() {
        let (repo, user, event) = setup().await;
        let job = repo
            .enqueue(user, event, "grant-1", Utc::now() - Duration::seconds(1), 5)
            .await
            .unwrap();

        let claimed = repo.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(claimed[0].status, DispatchJobStatus::Running);

        assert!(repo.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn future_jobs_are_not_claimed() {
        let (repo, user, event) = setup().await;
        repo.enqueue(user, event, "grant-1", Utc::now() + Duration::hours(1), 5)
            .await
            .unwrap();
        assert!(repo.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_gate_and_failure() {
        let (repo, user, event) = setup().await;
        let job = repo
            .enqueue(user, event, "grant-1", Utc::now() - Duration::seconds(1), 2)
            .await
            .unwrap();
        repo.claim_due(10).await.unwrap();

        assert!(
            repo.schedule_retry(job.id, Utc::now() + Duration::minutes(5), json!({"message": "boom"}))
                .await
                .unwrap()
        );
        assert!(repo.claim_due(10).await.unwrap().is_empty());

        let stored = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DispatchJobStatus::Queued);
        assert!(stored.retry_after.is_some());

        assert_eq!(repo.supersede_pending_for_event(event).await.unwrap(), 1);
        assert!(repo.find_by_id(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stuck_running_jobs_are_requeued() {
        let (repo, user, event) = setup().await;
        let job = repo
            .enqueue(user, event, "grant-1", Utc::now() - Duration::seconds(1), 5)
            .await
            .unwrap();
        repo.claim_due(10).await.unwrap();

        assert_eq!(repo.requeue_stuck(Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(repo.requeue_stuck(Duration::seconds(-5)).await.unwrap(), 1);
        let stored = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DispatchJobStatus::Queued);
    }

    #[tokio::test]
    async fn exhausted_jobs_are_parked() {
        let (repo, user, event) = setup().await;
        let job = repo
            .enqueue(user, event, "grant-1", Utc::now() - Duration::seconds(1), 1)
            .await
            .unwrap();
        repo.claim_due(10).await.unwrap();

        assert!(repo.mark_failed(job.id, json!({"message": "gone"})).await.unwrap());
        assert!(repo.find_pending_for_event(event).await.unwrap().is_none());
        let stored = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DispatchJobStatus::Failed);
    }
}
