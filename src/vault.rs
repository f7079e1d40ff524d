//! Credential vault.
//!
//! Seals per-connector credential JSON with the active key from the
//! [`KeyRing`] and opens it with whichever known key matches. Decrypted
//! material is handed to the caller and never cached.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::KeyRing;
use crate::error::HubError;
use crate::models::credential::{self, AuthType};
use crate::repositories::CredentialRepository;
use crate::repositories::credential::SealedOAuthTokens;

/// Largest accepted serialized credential document.
pub const MAX_CREDENTIALS_BYTES: usize = 1024 * 1024;

const PURPOSE_CREDENTIALS: &str = "credentials";
const PURPOSE_ACCESS_TOKEN: &str = "oauth_access_token";
const PURPOSE_REFRESH_TOKEN: &str = "oauth_refresh_token";

/// Decrypted credentials for one connector.
#[derive(Clone)]
pub struct StoredCredentials {
    pub auth_type: AuthType,
    pub credentials: Value,
    pub key_version: i32,
}

impl std::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("auth_type", &self.auth_type)
            .field("credentials", &"[REDACTED]")
            .field("key_version", &self.key_version)
            .finish()
    }
}

/// OAuth2 token set, sealed independently of the main credential blob.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Tokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    #[zeroize(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_url: Option<String>,
}

impl std::fmt::Debug for OAuth2Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Tokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// Credential lookups consumed by the orchestrators.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn get_credentials(
        &self,
        connector_id: Uuid,
    ) -> Result<Option<StoredCredentials>, HubError>;

    async fn get_oauth2_tokens(&self, connector_id: Uuid)
    -> Result<Option<OAuth2Tokens>, HubError>;
}

#[derive(Debug, Clone)]
pub struct CredentialVault {
    repo: CredentialRepository,
    keys: Arc<KeyRing>,
}

fn aad(connector_id: Uuid, purpose: &str) -> Vec<u8> {
    format!("connector:{connector_id}:{purpose}").into_bytes()
}

impl CredentialVault {
    pub fn new(repo: CredentialRepository, keys: Arc<KeyRing>) -> Self {
        Self { repo, keys }
    }

    pub fn key_version(&self) -> i32 {
        self.keys.active_version()
    }

    /// Serialize and seal a credential document for `connector_id`.
    pub fn encrypt_credentials(
        &self,
        connector_id: Uuid,
        credentials: &Value,
    ) -> Result<Vec<u8>, HubError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(credentials).map_err(|_| {
            HubError::Validation("credentials must be serializable JSON".to_string())
        })?);

        if plaintext.len() > MAX_CREDENTIALS_BYTES {
            return Err(HubError::Validation(format!(
                "credentials exceed the {MAX_CREDENTIALS_BYTES} byte limit"
            )));
        }

        self.seal(connector_id, PURPOSE_CREDENTIALS, &plaintext)
    }

    /// Open a credential blob. Any failure is reported as
    /// [`HubError::DecryptionFailed`].
    pub fn decrypt_credentials(
        &self,
        connector_id: Uuid,
        key_version: i32,
        blob: &[u8],
    ) -> Result<Value, HubError> {
        let plaintext = self.open(connector_id, PURPOSE_CREDENTIALS, key_version, blob)?;
        serde_json::from_slice(&plaintext).map_err(|_| HubError::DecryptionFailed)
    }

    pub async fn store_credentials(
        &self,
        connector_id: Uuid,
        auth_type: &str,
        credentials: &Value,
    ) -> Result<(), HubError> {
        let auth_type: AuthType = auth_type
            .parse()
            .map_err(|_| HubError::Validation(format!("unsupported auth type: {auth_type}")))?;
        if !credentials.is_object() {
            return Err(HubError::Validation(
                "credentials must be a JSON object".to_string(),
            ));
        }

        let blob = self.encrypt_credentials(connector_id, credentials)?;
        self.repo
            .upsert(connector_id, auth_type, blob, self.keys.active_version())
            .await?;

        debug!(
            connector_id = %connector_id,
            auth_type = %auth_type,
            key_version = self.keys.active_version(),
            "Stored connector credentials"
        );
        Ok(())
    }

    /// Returns `None` when the connector has no stored credentials.
    ///
    /// Touches `last_used_at` in the background; that write never blocks or
    /// fails the read.
    pub async fn get_credentials(
        &self,
        connector_id: Uuid,
    ) -> Result<Option<StoredCredentials>, HubError> {
        let Some(row) = self.repo.find_by_connector(connector_id).await? else {
            return Ok(None);
        };

        let credentials = self.decrypt_row(&row)?;
        self.touch_last_used(connector_id);
        Ok(Some(credentials))
    }

    pub async fn delete_credentials(&self, connector_id: Uuid) -> Result<bool, HubError> {
        let deleted = self.repo.delete_by_connector(connector_id).await?;
        debug!(connector_id = %connector_id, deleted, "Deleted connector credentials");
        Ok(deleted)
    }

    /// Replace the OAuth2 token columns of an existing credential row.
    pub async fn store_oauth2_tokens(
        &self,
        connector_id: Uuid,
        tokens: &OAuth2Tokens,
    ) -> Result<(), HubError> {
        if tokens.access_token.is_empty() {
            return Err(HubError::Validation(
                "accessToken must not be empty".to_string(),
            ));
        }

        let sealed = SealedOAuthTokens {
            access_token: self.seal(
                connector_id,
                PURPOSE_ACCESS_TOKEN,
                tokens.access_token.as_bytes(),
            )?,
            refresh_token: tokens
                .refresh_token
                .as_deref()
                .map(|token| self.seal(connector_id, PURPOSE_REFRESH_TOKEN, token.as_bytes()))
                .transpose()?,
            expires_at: tokens.expires_at,
            token_url: tokens.token_url.clone(),
        };

        if !self.repo.update_oauth_tokens(connector_id, sealed).await? {
            return Err(HubError::NotFound(format!(
                "credentials for connector {connector_id}"
            )));
        }

        debug!(connector_id = %connector_id, "Stored OAuth2 tokens");
        Ok(())
    }

    pub async fn get_oauth2_tokens(
        &self,
        connector_id: Uuid,
    ) -> Result<Option<OAuth2Tokens>, HubError> {
        let Some(row) = self.repo.find_by_connector(connector_id).await? else {
            return Ok(None);
        };
        let Some(access_blob) = row.oauth_access_token.as_deref() else {
            return Ok(None);
        };

        let version = row.encryption_key_version;
        let access_token =
            self.open_string(connector_id, PURPOSE_ACCESS_TOKEN, version, access_blob)?;
        let refresh_token = row
            .oauth_refresh_token
            .as_deref()
            .map(|blob| self.open_string(connector_id, PURPOSE_REFRESH_TOKEN, version, blob))
            .transpose()?;

        Ok(Some(OAuth2Tokens {
            access_token,
            refresh_token,
            expires_at: row.oauth_expires_at.map(|at| at.with_timezone(&Utc)),
            token_url: row.oauth_token_url.clone(),
        }))
    }

    fn decrypt_row(&self, row: &credential::Model) -> Result<StoredCredentials, HubError> {
        let auth_type = row.auth_type.parse().map_err(|_| {
            HubError::Internal(format!(
                "connector {} has an unrecognized auth type",
                row.connector_id
            ))
        })?;
        let credentials = self
            .decrypt_credentials(
                row.connector_id,
                row.encryption_key_version,
                &row.encrypted_credentials,
            )
            .inspect_err(|_| {
                warn!(connector_id = %row.connector_id, "Credential decryption failed");
            })?;

        Ok(StoredCredentials {
            auth_type,
            credentials,
            key_version: row.encryption_key_version,
        })
    }

    fn seal(&self, connector_id: Uuid, purpose: &str, plaintext: &[u8]) -> Result<Vec<u8>, HubError> {
        self.keys
            .encrypt(&aad(connector_id, purpose), plaintext)
            .map_err(|_| HubError::Internal("credential encryption failed".to_string()))
    }

    fn open(
        &self,
        connector_id: Uuid,
        purpose: &str,
        key_version: i32,
        blob: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, HubError> {
        self.keys
            .decrypt(key_version, &aad(connector_id, purpose), blob)
            .map(Zeroizing::new)
            .map_err(|_| HubError::DecryptionFailed)
    }

    fn open_string(
        &self,
        connector_id: Uuid,
        purpose: &str,
        key_version: i32,
        blob: &[u8],
    ) -> Result<String, HubError> {
        let plaintext = self.open(connector_id, purpose, key_version, blob)?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| HubError::DecryptionFailed)
    }

    fn touch_last_used(&self, connector_id: Uuid) {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(err) = repo.touch_last_used(connector_id).await {
                warn!(connector_id = %connector_id, error = %err, "Failed to update credential last_used_at");
            }
        });
    }
}

#[async_trait]
impl CredentialSource for CredentialVault {
    async fn get_credentials(
        &self,
        connector_id: Uuid,
    ) -> Result<Option<StoredCredentials>, HubError> {
        CredentialVault::get_credentials(self, connector_id).await
    }

    async fn get_oauth2_tokens(
        &self,
        connector_id: Uuid,
    ) -> Result<Option<OAuth2Tokens>, HubError> {
        CredentialVault::get_oauth2_tokens(self, connector_id).await
    }
}
