use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdempotencyRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IdempotencyRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IdempotencyRecords::Scope)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdempotencyRecords::IdempotencyKey)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdempotencyRecords::RequestHash)
                            .string_len(88)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdempotencyRecords::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(IdempotencyRecords::HttpStatus).small_integer())
                    .col(ColumnDef::new(IdempotencyRecords::ResponseBody).text())
                    .col(ColumnDef::new(IdempotencyRecords::PaymentId).uuid())
                    .col(
                        ColumnDef::new(IdempotencyRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdempotencyRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Serialization point for replay/conflict decisions.
        manager
            .create_index(
                Index::create()
                    .table(IdempotencyRecords::Table)
                    .col(IdempotencyRecords::Scope)
                    .col(IdempotencyRecords::IdempotencyKey)
                    .unique()
                    .name("uq_idempotency_scope_key")
                    .to_owned(),
            )
            .await?;

        // Supports operational cleanup of old records (outside this service).
        manager
            .create_index(
                Index::create()
                    .table(IdempotencyRecords::Table)
                    .col(IdempotencyRecords::CreatedAt)
                    .name("idx_idempotency_created_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IdempotencyRecords::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum IdempotencyRecords {
    Table,
    Id,
    Scope,
    IdempotencyKey,
    RequestHash,
    Status,
    HttpStatus,
    ResponseBody,
    PaymentId,
    CreatedAt,
    UpdatedAt,
}
