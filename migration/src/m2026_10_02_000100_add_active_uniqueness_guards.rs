//! Adds partial unique indexes enforcing at most one active recording and at most one pending
//! dispatch job per event.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

const ACTIVE_RECORDING_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_one_active_per_event \
     ON recordings (event_id) \
     WHERE status IN ('waiting','joining','attending','leaving','retrieving','processing')";

const PENDING_DISPATCH_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_dispatch_jobs_one_pending_per_event \
     ON dispatch_jobs (event_id) \
     WHERE status IN ('queued','running')";

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        if !matches!(backend, DatabaseBackend::Postgres | DatabaseBackend::Sqlite) {
            return Err(DbErr::Migration(format!(
                "partial unique indexes are not supported on {backend:?}"
            )));
        }

        for sql in [ACTIVE_RECORDING_INDEX, PENDING_DISPATCH_INDEX] {
            manager
                .get_connection()
                .execute(Statement::from_string(backend, sql.to_string()))
                .await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        for index in [
            "idx_recordings_one_active_per_event",
            "idx_dispatch_jobs_one_pending_per_event",
        ] {
            manager
                .get_connection()
                .execute(Statement::from_string(
                    backend,
                    format!("DROP INDEX IF EXISTS {index}"),
                ))
                .await?;
        }
        Ok(())
    }
}
