//! Creates the dispatch_jobs table backing the delayed dispatch queue.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DispatchJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DispatchJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DispatchJobs::UserId).uuid().not_null())
                    .col(ColumnDef::new(DispatchJobs::EventId).uuid().not_null())
                    .col(ColumnDef::new(DispatchJobs::GrantId).text().not_null())
                    .col(
                        ColumnDef::new(DispatchJobs::ScheduledFor)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DispatchJobs::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(DispatchJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DispatchJobs::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(DispatchJobs::RetryAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DispatchJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(DispatchJobs::LastError).json_binary().null())
                    .col(
                        ColumnDef::new(DispatchJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DispatchJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_dispatch_jobs_event_id")
                            .from(DispatchJobs::Table, DispatchJobs::EventId)
                            .to(Events::Table, Events::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dispatch_jobs_status_scheduled")
                    .table(DispatchJobs::Table)
                    .col(DispatchJobs::Status)
                    .col(DispatchJobs::ScheduledFor)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DispatchJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DispatchJobs {
    Table,
    Id,
    UserId,
    EventId,
    GrantId,
    ScheduledFor,
    Status,
    Attempts,
    MaxAttempts,
    RetryAfter,
    StartedAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
}
