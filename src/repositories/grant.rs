//! # Grant Repository
//!
//! Grants gate dispatch; webhook `grant.*` deliveries keep the stored status current.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::map_db_err;
use crate::error::EngineError;
use crate::models::grant::{ActiveModel, Column, Entity, GrantStatus, Model};

/// Repository for grant database operations
#[derive(Clone)]
pub struct GrantRepository {
    db: DatabaseConnection,
}

impl GrantRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_grant_id(&self, grant_id: &str) -> Result<Option<Model>, EngineError> {
        Entity::find()
            .filter(Column::GrantId.eq(grant_id))
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load grant"))
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Model>, EngineError> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::UpdatedAt)
            .one(&self.db)
            .await
            .map_err(map_db_err("Failed to load grant for user"))
    }

    /// Creates or refreshes the grant row for a user.
    pub async fn upsert(
        &self,
        user_id: Uuid,
        grant_id: &str,
        email: Option<String>,
        status: GrantStatus,
    ) -> Result<Model, EngineError> {
        let now = Utc::now().fixed_offset();
        let existing = match self.find_by_grant_id(grant_id).await? {
            Some(row) => Some(row),
            None => self.find_by_user(user_id).await?,
        };

        match existing {
            Some(row) => {
                let mut active: ActiveModel = row.into();
                active.grant_id = Set(grant_id.to_string());
                if email.is_some() {
                    active.email = Set(email);
                }
                active.status = Set(status);
                active.updated_at = Set(now);
                active
                    .update(&self.db)
                    .await
                    .map_err(map_db_err("Failed to update grant"))
            }
            None => ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                grant_id: Set(grant_id.to_string()),
                email: Set(email),
                status: Set(status),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&self.db)
            .await
            .map_err(map_db_err("Failed to insert grant")),
        }
    }

    /// Updates the status of a known grant. Returns false when the grant is unknown.
    pub async fn set_status(&self, grant_id: &str, status: GrantStatus) -> Result<bool, EngineError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::GrantId.eq(grant_id))
            .exec(&self.db)
            .await
            .map_err(map_db_err("Failed to update grant status"))?;
        Ok(result.rows_affected > 0)
    }
}
