//! Credential row storage.
//!
//! Holds ciphertext only; sealing and opening happen in
//! [`crate::vault::CredentialVault`].

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::HubError;
use crate::models::credential::{self, AuthType, Entity as ConnectorCredential};

/// Sealed OAuth2 token columns.
#[derive(Clone, Default)]
pub struct SealedOAuthTokens {
    pub access_token: Vec<u8>,
    pub refresh_token: Option<Vec<u8>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialRepository {
    pub db: Arc<DatabaseConnection>,
}

impl CredentialRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_connector(
        &self,
        connector_id: Uuid,
    ) -> Result<Option<credential::Model>, HubError> {
        Ok(ConnectorCredential::find()
            .filter(credential::Column::ConnectorId.eq(connector_id))
            .one(&*self.db)
            .await?)
    }

    /// Insert or replace the credential row for a connector.
    ///
    /// Replacing keeps the stored OAuth2 token columns untouched.
    pub async fn upsert(
        &self,
        connector_id: Uuid,
        auth_type: AuthType,
        encrypted: Vec<u8>,
        key_version: i32,
    ) -> Result<credential::Model, HubError> {
        let now = Utc::now();
        let active = credential::ActiveModel {
            id: Set(Uuid::new_v4()),
            connector_id: Set(connector_id),
            auth_type: Set(auth_type.as_str().to_string()),
            encrypted_credentials: Set(encrypted),
            encryption_key_version: Set(key_version),
            oauth_access_token: Set(None),
            oauth_refresh_token: Set(None),
            oauth_expires_at: Set(None),
            oauth_token_url: Set(None),
            last_used_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        ConnectorCredential::insert(active)
            .on_conflict(
                OnConflict::column(credential::Column::ConnectorId)
                    .update_columns([
                        credential::Column::AuthType,
                        credential::Column::EncryptedCredentials,
                        credential::Column::EncryptionKeyVersion,
                        credential::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find_by_connector(connector_id).await?.ok_or_else(|| {
            HubError::Internal(format!("credentials for connector {connector_id} not persisted"))
        })
    }

    /// Replace only the OAuth2 token columns. Returns `false` when the
    /// connector has no credential row.
    pub async fn update_oauth_tokens(
        &self,
        connector_id: Uuid,
        tokens: SealedOAuthTokens,
    ) -> Result<bool, HubError> {
        let Some(existing) = self.find_by_connector(connector_id).await? else {
            return Ok(false);
        };

        let mut model: credential::ActiveModel = existing.into();
        model.oauth_access_token = Set(Some(tokens.access_token));
        model.oauth_refresh_token = Set(tokens.refresh_token);
        model.oauth_expires_at = Set(tokens.expires_at.map(Into::into));
        model.oauth_token_url = Set(tokens.token_url);
        model.updated_at = Set(Utc::now().into());
        model.update(&*self.db).await?;
        Ok(true)
    }

    pub async fn delete_by_connector(&self, connector_id: Uuid) -> Result<bool, HubError> {
        let result = ConnectorCredential::delete_many()
            .filter(credential::Column::ConnectorId.eq(connector_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn touch_last_used(&self, connector_id: Uuid) -> Result<(), HubError> {
        ConnectorCredential::update_many()
            .col_expr(
                credential::Column::LastUsedAt,
                sea_orm::sea_query::Expr::value(Some(sea_orm::prelude::DateTimeWithTimeZone::from(
                    Utc::now(),
                ))),
            )
            .filter(credential::Column::ConnectorId.eq(connector_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
