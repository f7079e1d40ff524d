//! Connector credential entity model
//!
//! One row per connector at most. `encrypted_credentials` holds the sealed
//! credential JSON; OAuth2 tokens are sealed separately so a refresh can
//! replace them alone.

use std::{fmt, str::FromStr};

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connector_credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub connector_id: Uuid,

    pub auth_type: String,

    pub encrypted_credentials: Vec<u8>,

    pub encryption_key_version: i32,

    pub oauth_access_token: Option<Vec<u8>>,

    pub oauth_refresh_token: Option<Vec<u8>>,

    pub oauth_expires_at: Option<DateTimeWithTimeZone>,

    pub oauth_token_url: Option<String>,

    pub last_used_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

// Ciphertext stays out of logs and panic messages.
impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("connector_id", &self.connector_id)
            .field("auth_type", &self.auth_type)
            .field("encrypted_credentials", &"[REDACTED]")
            .field("encryption_key_version", &self.encryption_key_version)
            .field(
                "oauth_access_token",
                &self.oauth_access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "oauth_refresh_token",
                &self.oauth_refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("oauth_expires_at", &self.oauth_expires_at)
            .field("oauth_token_url", &self.oauth_token_url)
            .field("last_used_at", &self.last_used_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connector::Entity",
        from = "Column::ConnectorId",
        to = "super::connector::Column::Id"
    )]
    Connector,
}

impl Related<super::connector::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connector.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Closed set of credential kinds a connector may store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[serde(rename = "oauth2")]
    OAuth2,
    ApiKey,
    Basic,
    Session,
    Custom,
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::OAuth2 => "oauth2",
            AuthType::ApiKey => "api_key",
            AuthType::Basic => "basic",
            AuthType::Session => "session",
            AuthType::Custom => "custom",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oauth2" => Ok(AuthType::OAuth2),
            "api_key" => Ok(AuthType::ApiKey),
            "basic" => Ok(AuthType::Basic),
            "session" => Ok(AuthType::Session),
            "custom" => Ok(AuthType::Custom),
            other => Err(format!("unsupported auth type: {other}")),
        }
    }
}
