//! Migration to create the connectors table.
//!
//! Connectors bind one organization to one ERP/CRM definition. Rows are never
//! hard-deleted; `deleted_at` marks a soft delete and frees the name for reuse.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connectors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connectors::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connectors::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(Connectors::DefinitionId).text().not_null())
                    .col(ColumnDef::new(Connectors::Name).text().not_null())
                    .col(ColumnDef::new(Connectors::Config).json_binary().not_null())
                    .col(
                        ColumnDef::new(Connectors::RateLimitRequests)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connectors::RateLimitWindowSeconds)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(Connectors::TimeoutMs).big_integer().null())
                    .col(
                        ColumnDef::new(Connectors::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Connectors::HealthStatus)
                            .text()
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(Connectors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connectors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connectors::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Name uniqueness among live rows is enforced by the repository; this index
        // serves the (organization, name) lookup it performs.
        manager
            .create_index(
                Index::create()
                    .name("idx_connectors_organization_name")
                    .table(Connectors::Table)
                    .col(Connectors::OrganizationId)
                    .col(Connectors::Name)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_connectors_organization_name")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Connectors::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connectors {
    Table,
    Id,
    OrganizationId,
    DefinitionId,
    Name,
    Config,
    RateLimitRequests,
    RateLimitWindowSeconds,
    TimeoutMs,
    IsEnabled,
    HealthStatus,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}
