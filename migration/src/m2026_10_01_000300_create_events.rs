//! Creates the events table mirroring provider calendar events.
//!
//! One row per (user, provider event id). `calendar_uid` is indexed but not unique: duplicates
//! can land through concurrent sync and webhook paths and are collapsed by the dedup sweep.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Events::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Events::UserId).uuid().not_null())
                    .col(ColumnDef::new(Events::ProviderEventId).text().not_null())
                    .col(ColumnDef::new(Events::CalendarUid).text().not_null())
                    .col(ColumnDef::new(Events::Title).text().not_null())
                    .col(ColumnDef::new(Events::Description).text().null())
                    .col(ColumnDef::new(Events::Location).text().null())
                    .col(
                        ColumnDef::new(Events::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Events::EndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Events::ConferenceUrl).text().null())
                    .col(ColumnDef::new(Events::Organizer).json_binary().null())
                    .col(ColumnDef::new(Events::Participants).json_binary().not_null())
                    .col(ColumnDef::new(Events::MasterEventId).text().null())
                    .col(
                        ColumnDef::new(Events::OriginalStartTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Events::Recurrence).json_binary().null())
                    .col(
                        ColumnDef::new(Events::LastUpdated)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Events::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Events::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_user_provider_event")
                    .table(Events::Table)
                    .col(Events::UserId)
                    .col(Events::ProviderEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_user_calendar_uid")
                    .table(Events::Table)
                    .col(Events::UserId)
                    .col(Events::CalendarUid)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_user_master")
                    .table(Events::Table)
                    .col(Events::UserId)
                    .col(Events::MasterEventId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
    UserId,
    ProviderEventId,
    CalendarUid,
    Title,
    Description,
    Location,
    StartTime,
    EndTime,
    ConferenceUrl,
    Organizer,
    Participants,
    MasterEventId,
    OriginalStartTime,
    Recurrence,
    LastUpdated,
    CreatedAt,
    UpdatedAt,
}
