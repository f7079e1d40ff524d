//! Migration to create the field_mappings table.
//!
//! A null `form_id` marks a reusable template mapping for the connector.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FieldMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FieldMappings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FieldMappings::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(FieldMappings::ConnectorId).uuid().not_null())
                    .col(ColumnDef::new(FieldMappings::FormId).uuid().null())
                    .col(ColumnDef::new(FieldMappings::FormField).text().not_null())
                    .col(ColumnDef::new(FieldMappings::ConnectorField).text().not_null())
                    .col(ColumnDef::new(FieldMappings::Transforms).json_binary().not_null())
                    .col(
                        ColumnDef::new(FieldMappings::Required)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(FieldMappings::DefaultValue).json_binary().null())
                    .col(
                        ColumnDef::new(FieldMappings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(FieldMappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(FieldMappings::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_field_mappings_connector_form")
                    .table(FieldMappings::Table)
                    .col(FieldMappings::ConnectorId)
                    .col(FieldMappings::FormId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_field_mappings_organization_id")
                    .table(FieldMappings::Table)
                    .col(FieldMappings::OrganizationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_field_mappings_connector_form")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_field_mappings_organization_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(FieldMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FieldMappings {
    Table,
    Id,
    OrganizationId,
    ConnectorId,
    FormId,
    FormField,
    ConnectorField,
    Transforms,
    Required,
    DefaultValue,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}
