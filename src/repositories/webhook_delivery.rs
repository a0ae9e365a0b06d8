//! Append-only webhook audit log.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::map_db_err;
use crate::error::EngineError;
use crate::models::webhook_delivery::{
    ActiveModel, Column, DeliverySource, DeliveryStatus, Entity, Model,
};

/// One routed delivery, as it will be written to the audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub source: DeliverySource,
    pub delivery_type: String,
    pub event_id: Option<String>,
    pub recording_id: Option<Uuid>,
    pub agent_session_id: Option<String>,
    pub status: DeliveryStatus,
    pub message: Option<String>,
    pub payload: JsonValue,
}

impl DeliveryRecord {
    pub fn new(source: DeliverySource, delivery_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            source,
            delivery_type: delivery_type.into(),
            event_id: None,
            recording_id: None,
            agent_session_id: None,
            status: DeliveryStatus::Success,
            message: None,
            payload,
        }
    }
}

#[derive(Clone)]
pub struct WebhookDeliveryRepository {
    db: DatabaseConnection,
}

impl WebhookDeliveryRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn record(&self, delivery: DeliveryRecord) -> Result<Model, EngineError> {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            received_at: Set(Utc::now().fixed_offset()),
            source: Set(delivery.source),
            delivery_type: Set(delivery.delivery_type),
            event_id: Set(delivery.event_id),
            recording_id: Set(delivery.recording_id),
            agent_session_id: Set(delivery.agent_session_id),
            status: Set(delivery.status),
            message: Set(delivery.message),
            payload: Set(delivery.payload),
        }
        .insert(&self.db)
        .await
        .map_err(map_db_err("Failed to record webhook delivery"))
    }

    /// Most recent deliveries first.
    pub async fn list_recent(&self, limit: u64) -> Result<Vec<Model>, EngineError> {
        Entity::find()
            .order_by_desc(Column::ReceivedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list webhook deliveries"))
    }

    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Model>, EngineError> {
        Entity::find()
            .filter(Column::AgentSessionId.eq(session_id))
            .order_by_asc(Column::ReceivedAt)
            .all(&self.db)
            .await
            .map_err(map_db_err("Failed to list webhook deliveries for session"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    #[tokio::test]
    async fn records_are_appended() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = WebhookDeliveryRepository::new(db);

        let mut record = DeliveryRecord::new(
            DeliverySource::Calendar,
            "notetaker.status_updated",
            json!({"type": "notetaker.status_updated"}),
        );
        record.agent_session_id = Some("nt-1".to_string());
        repo.record(record.clone()).await.unwrap();
        repo.record(record).await.unwrap();

        let rows = repo.list_for_session("nt-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, DeliveryStatus::Success);
        assert_eq!(repo.list_recent(1).await.unwrap().len(), 1);
    }
}
