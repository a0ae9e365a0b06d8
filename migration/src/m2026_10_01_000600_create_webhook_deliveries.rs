//! Creates the append-only webhook delivery audit log.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookDeliveries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookDeliveries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(WebhookDeliveries::Source).text().not_null())
                    .col(
                        ColumnDef::new(WebhookDeliveries::DeliveryType)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookDeliveries::EventId).text().null())
                    .col(ColumnDef::new(WebhookDeliveries::RecordingId).uuid().null())
                    .col(
                        ColumnDef::new(WebhookDeliveries::AgentSessionId)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(WebhookDeliveries::Status).text().not_null())
                    .col(ColumnDef::new(WebhookDeliveries::Message).text().null())
                    .col(
                        ColumnDef::new(WebhookDeliveries::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_deliveries_received_at")
                    .table(WebhookDeliveries::Table)
                    .col(WebhookDeliveries::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_deliveries_agent_session")
                    .table(WebhookDeliveries::Table)
                    .col(WebhookDeliveries::AgentSessionId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WebhookDeliveries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookDeliveries {
    Table,
    Id,
    ReceivedAt,
    Source,
    DeliveryType,
    EventId,
    RecordingId,
    AgentSessionId,
    Status,
    Message,
    Payload,
}
