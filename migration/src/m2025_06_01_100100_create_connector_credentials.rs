//! Migration to create the connector_credentials table.
//!
//! At most one encrypted credential row exists per connector. OAuth2 access and
//! refresh tokens live in their own ciphertext columns so a token refresh never
//! re-encrypts the main credential blob.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConnectorCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectorCredentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::ConnectorId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::AuthType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::EncryptedCredentials)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::EncryptionKeyVersion)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::OauthAccessToken)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::OauthRefreshToken)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::OauthExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::OauthTokenUrl)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ConnectorCredentials::UpdatedAt)
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
                    .name("idx_connector_credentials_connector_id")
                    .table(ConnectorCredentials::Table)
                    .col(ConnectorCredentials::ConnectorId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_connector_credentials_connector_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ConnectorCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConnectorCredentials {
    Table,
    Id,
    ConnectorId,
    AuthType,
    EncryptedCredentials,
    EncryptionKeyVersion,
    OauthAccessToken,
    OauthRefreshToken,
    OauthExpiresAt,
    OauthTokenUrl,
    LastUsedAt,
    CreatedAt,
    UpdatedAt,
}
