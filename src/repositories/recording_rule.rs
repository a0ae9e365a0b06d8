//! Per-user recording preferences.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

use super::map_db_err;
use crate::error::EngineError;
use crate::models::recording_rule::{ActiveModel, Column, Entity, SeriesOverrides};
use crate::rules::RecordingPreferences;

#[derive(Clone)]
pub struct RecordingRuleRepository {
    db: DatabaseConnection,
}

impl RecordingRuleRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Stored preferences, or the defaults when the user never set any.
    pub async fn preferences(&self, user_id: Uuid) -> Result<RecordingPreferences, EngineError> {
        let row = Entity::find_by_id(user_id)
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load recording rules"))?;
        Ok(row.map(RecordingPreferences::from).unwrap_or_default())
    }

    pub async fn save(&self, user_id: Uuid, prefs: &RecordingPreferences) -> Result<(), EngineError> {
        let row = ActiveModel {
            user_id: Set(user_id),
            record_internal: Set(prefs.record_internal),
            record_external: Set(prefs.record_external),
            series_overrides: Set(SeriesOverrides(prefs.series_overrides.clone())),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::UserId)
                    .update_columns([
                        Column::RecordInternal,
                        Column::RecordExternal,
                        Column::SeriesOverrides,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to save recording rules"))?;
        Ok(())
    }
}
