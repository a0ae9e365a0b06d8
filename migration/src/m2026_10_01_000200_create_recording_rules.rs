//! Creates the per-user recording preference table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecordingRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecordingRules::UserId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RecordingRules::RecordInternal)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RecordingRules::RecordExternal)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(RecordingRules::SeriesOverrides)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecordingRules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RecordingRules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RecordingRules {
    Table,
    UserId,
    RecordInternal,
    RecordExternal,
    SeriesOverrides,
    UpdatedAt,
}
