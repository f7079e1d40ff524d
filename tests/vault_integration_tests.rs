//! Credential vault against a migrated database.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use integration_hub::crypto::{CryptoKey, KeyRing};
use integration_hub::error::HubError;
use integration_hub::models::credential::{self, AuthType};
use integration_hub::repositories::CredentialRepository;
use integration_hub::vault::{CredentialVault, MAX_CREDENTIALS_BYTES, OAuth2Tokens};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::TestHub;

async fn hub_with_connector() -> Result<(TestHub, Uuid)> {
    let hub = TestHub::new().await?;
    let connector = hub
        .create_connector(
            Uuid::new_v4(),
            "Priority",
            json!({"baseUrl": "https://erp.example.com"}),
        )
        .await?;
    Ok((hub, connector.id))
}

#[tokio::test]
async fn stores_and_reads_hebrew_credentials() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    let credentials = json!({"username": "משתמש", "password": "סיסמה-123"});

    hub.vault
        .store_credentials(connector_id, "basic", &credentials)
        .await?;
    let stored = hub
        .vault
        .get_credentials(connector_id)
        .await?
        .expect("credentials exist");

    assert_eq!(stored.auth_type, AuthType::Basic);
    assert_eq!(stored.credentials, credentials);
    assert_eq!(stored.key_version, 1);
    Ok(())
}

#[tokio::test]
async fn ciphertext_column_does_not_contain_plaintext() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    hub.vault
        .store_credentials(connector_id, "api_key", &json!({"apiKey": "sk-live-secret"}))
        .await?;

    let row = credential::Entity::find()
        .filter(credential::Column::ConnectorId.eq(connector_id))
        .one(&*hub.db)
        .await?
        .expect("row exists");

    let needle = b"sk-live-secret";
    assert!(
        !row.encrypted_credentials
            .windows(needle.len())
            .any(|window| window == needle)
    );
    assert_eq!(row.auth_type, "api_key");
    Ok(())
}

#[tokio::test]
async fn upsert_keeps_one_row_per_connector() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;

    hub.vault
        .store_credentials(connector_id, "basic", &json!({"username": "a", "password": "1"}))
        .await?;
    hub.vault
        .store_credentials(connector_id, "api_key", &json!({"apiKey": "k2"}))
        .await?;

    let rows = credential::Entity::find()
        .filter(credential::Column::ConnectorId.eq(connector_id))
        .all(&*hub.db)
        .await?;
    assert_eq!(rows.len(), 1);

    let stored = hub.vault.get_credentials(connector_id).await?.unwrap();
    assert_eq!(stored.auth_type, AuthType::ApiKey);
    assert_eq!(stored.credentials, json!({"apiKey": "k2"}));
    Ok(())
}

#[tokio::test]
async fn unknown_auth_type_is_validation_error() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;

    let err = hub
        .vault
        .store_credentials(connector_id, "kerberos", &json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn oversized_credentials_rejected_before_encryption() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    let blob = "x".repeat(MAX_CREDENTIALS_BYTES);

    let err = hub
        .vault
        .store_credentials(connector_id, "custom", &json!({"payload": blob}))
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::Validation(_)));
    assert!(hub.vault.get_credentials(connector_id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn missing_credentials_read_as_none() -> Result<()> {
    let (hub, _) = hub_with_connector().await?;

    assert!(hub.vault.get_credentials(Uuid::new_v4()).await?.is_none());
    assert!(hub.vault.get_oauth2_tokens(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn read_touches_last_used_in_background() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    hub.vault
        .store_credentials(connector_id, "basic", &json!({"username": "u", "password": "p"}))
        .await?;

    hub.vault.get_credentials(connector_id).await?;

    let mut touched = false;
    for _ in 0..50 {
        let row = credential::Entity::find()
            .filter(credential::Column::ConnectorId.eq(connector_id))
            .one(&*hub.db)
            .await?
            .expect("row exists");
        if row.last_used_at.is_some() {
            touched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(touched);
    Ok(())
}

#[tokio::test]
async fn tampered_row_fails_without_leaking_material() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    hub.vault
        .store_credentials(connector_id, "basic", &json!({"username": "u", "password": "hunter2"}))
        .await?;

    let row = credential::Entity::find()
        .filter(credential::Column::ConnectorId.eq(connector_id))
        .one(&*hub.db)
        .await?
        .expect("row exists");
    let mut tampered = row.encrypted_credentials.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    let mut active: credential::ActiveModel = row.into();
    active.encrypted_credentials = Set(tampered.clone());
    active.update(&*hub.db).await?;

    let err = hub.vault.get_credentials(connector_id).await.unwrap_err();

    assert!(matches!(err, HubError::DecryptionFailed));
    let message = err.to_string();
    assert!(!message.contains("hunter2"));
    assert!(!message.contains(&hex::encode(&tampered)));
    Ok(())
}

#[tokio::test]
async fn rotated_key_still_decrypts_old_rows() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    hub.vault
        .store_credentials(connector_id, "api_key", &json!({"apiKey": "old"}))
        .await?;

    let rotated = Arc::new(
        KeyRing::new(2, CryptoKey::new(vec![0x24; 32])?)
            .with_previous(1, CryptoKey::new(vec![0x42; 32])?),
    );
    let vault = CredentialVault::new(CredentialRepository::new(Arc::clone(&hub.db)), rotated);

    let stored = vault.get_credentials(connector_id).await?.unwrap();
    assert_eq!(stored.credentials, json!({"apiKey": "old"}));
    assert_eq!(stored.key_version, 1);

    vault
        .store_credentials(connector_id, "api_key", &json!({"apiKey": "new"}))
        .await?;
    assert_eq!(vault.get_credentials(connector_id).await?.unwrap().key_version, 2);
    assert!(matches!(
        hub.vault.get_credentials(connector_id).await.unwrap_err(),
        HubError::DecryptionFailed
    ));
    Ok(())
}

#[tokio::test]
async fn oauth_tokens_replace_only_token_columns() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    let credentials = json!({"clientId": "client", "clientSecret": "secret"});
    hub.vault
        .store_credentials(connector_id, "oauth2", &credentials)
        .await?;

    let expires_at = Utc::now() + chrono::Duration::hours(1);
    hub.vault
        .store_oauth2_tokens(
            connector_id,
            &OAuth2Tokens {
                access_token: "access-1".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_at: Some(expires_at),
                token_url: Some("https://auth.example.com/token".to_string()),
            },
        )
        .await?;

    let tokens = hub.vault.get_oauth2_tokens(connector_id).await?.unwrap();
    assert_eq!(tokens.access_token, "access-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(
        tokens.token_url.as_deref(),
        Some("https://auth.example.com/token")
    );
    assert_eq!(
        hub.vault.get_credentials(connector_id).await?.unwrap().credentials,
        credentials
    );
    Ok(())
}

#[tokio::test]
async fn oauth_tokens_require_existing_credentials() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;

    let err = hub
        .vault
        .store_oauth2_tokens(
            connector_id,
            &OAuth2Tokens {
                access_token: "access".to_string(),
                refresh_token: None,
                expires_at: None,
                token_url: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn delete_reports_whether_a_row_existed() -> Result<()> {
    let (hub, connector_id) = hub_with_connector().await?;
    hub.vault
        .store_credentials(connector_id, "session", &json!({}))
        .await?;

    assert!(hub.vault.delete_credentials(connector_id).await?);
    assert!(!hub.vault.delete_credentials(connector_id).await?);
    assert!(hub.vault.get_credentials(connector_id).await?.is_none());
    Ok(())
}
