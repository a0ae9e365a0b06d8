//! Database migrations for the notetaker orchestration service.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000100_create_grants;
mod m2026_10_01_000200_create_recording_rules;
mod m2026_10_01_000300_create_events;
mod m2026_10_01_000400_create_recordings;
mod m2026_10_01_000500_create_dispatch_jobs;
mod m2026_10_01_000600_create_webhook_deliveries;
mod m2026_10_02_000100_add_active_uniqueness_guards;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000100_create_grants::Migration),
            Box::new(m2026_10_01_000200_create_recording_rules::Migration),
            Box::new(m2026_10_01_000300_create_events::Migration),
            Box::new(m2026_10_01_000400_create_recordings::Migration),
            Box::new(m2026_10_01_000500_create_dispatch_jobs::Migration),
            Box::new(m2026_10_01_000600_create_webhook_deliveries::Migration),
            Box::new(m2026_10_02_000100_add_active_uniqueness_guards::Migration),
        ]
    }
}
