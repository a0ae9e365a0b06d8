//! Creates the recordings table: one row per attempted or completed meeting capture.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Recordings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Recordings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Recordings::UserId).uuid().not_null())
                    .col(ColumnDef::new(Recordings::EventId).uuid().null())
                    .col(ColumnDef::new(Recordings::AgentSessionId).text().null())
                    .col(ColumnDef::new(Recordings::Status).text().not_null())
                    .col(
                        ColumnDef::new(Recordings::ScheduledJoinTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Recordings::MediaUrl).text().null())
                    .col(ColumnDef::new(Recordings::TranscodingAssetId).text().null())
                    .col(ColumnDef::new(Recordings::PlaybackId).text().null())
                    .col(ColumnDef::new(Recordings::DurationSeconds).integer().null())
                    .col(ColumnDef::new(Recordings::LastError).text().null())
                    .col(
                        ColumnDef::new(Recordings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Recordings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recordings_event_id")
                            .from(Recordings::Table, Recordings::EventId)
                            .to(Events::Table, Events::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_recordings_agent_session")
                    .table(Recordings::Table)
                    .col(Recordings::AgentSessionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_recordings_transcoding_asset")
                    .table(Recordings::Table)
                    .col(Recordings::TranscodingAssetId)
                    .to_owned(),
            )
            .await?;

        // Monitor scans processing rows by staleness.
        manager
            .create_index(
                Index::create()
                    .name("idx_recordings_status_updated")
                    .table(Recordings::Table)
                    .col(Recordings::Status)
                    .col(Recordings::UpdatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Recordings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Recordings {
    Table,
    Id,
    UserId,
    EventId,
    AgentSessionId,
    Status,
    ScheduledJoinTime,
    MediaUrl,
    TranscodingAssetId,
    PlaybackId,
    DurationSeconds,
    LastError,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
}
