//! Test utilities for database-backed tests.
//!
//! In-memory SQLite with every migration applied, plus fixtures that go
//! through the real repositories and vault.

use std::sync::Arc;

use anyhow::Result;
use integration_hub::cache::{MemoryCacheStore, PullCache};
use integration_hub::config::{AppConfig, GatewayConfig};
use integration_hub::crypto::{CryptoKey, KeyRing};
use integration_hub::gateway::OutboundGateway;
use integration_hub::models::{connector, field_mapping};
use integration_hub::orchestrator::{PullOrchestrator, PushOrchestrator};
use integration_hub::repositories::{
    ConnectorRepository, CredentialRepository, FieldMappingRepository, NewConnector,
    NewFieldMapping,
};
use integration_hub::transforms::TransformSpec;
use integration_hub::vault::CredentialVault;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::Value;
use uuid::Uuid;

/// Operator token accepted by [`test_config`].
#[allow(dead_code)]
pub const TEST_TOKEN: &str = "test-operator-token";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Sets up an in-memory SQLite database with all migrations applied and returns an Arc.
#[allow(dead_code)]
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

#[allow(dead_code)]
pub fn test_key_ring() -> Arc<KeyRing> {
    Arc::new(KeyRing::new(
        1,
        CryptoKey::new(vec![0x42; 32]).expect("32-byte key"),
    ))
}

#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        operator_tokens: vec![TEST_TOKEN.to_string()],
        encryption_key: Some("42".repeat(32)),
        gateway: fast_gateway_config(),
        ..Default::default()
    }
}

/// Gateway settings with millisecond backoff so retry tests stay quick.
#[allow(dead_code)]
pub fn fast_gateway_config() -> GatewayConfig {
    GatewayConfig {
        default_timeout_ms: 2_000,
        failure_threshold: 3,
        cooldown_seconds: 30,
        max_retries: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        jitter_factor: 0.0,
    }
}

/// Every collaborator of the orchestrators, backed by one database.
#[allow(dead_code)]
pub struct TestHub {
    pub db: Arc<DatabaseConnection>,
    pub connectors: ConnectorRepository,
    pub mappings: FieldMappingRepository,
    pub vault: CredentialVault,
    pub store: Arc<MemoryCacheStore>,
    pub cache: PullCache,
    pub gateway: Arc<OutboundGateway>,
}

#[allow(dead_code)]
impl TestHub {
    pub async fn new() -> Result<Self> {
        Self::with_gateway(fast_gateway_config()).await
    }

    pub async fn with_gateway(gateway: GatewayConfig) -> Result<Self> {
        let db = setup_test_db_arc().await?;
        let store = Arc::new(MemoryCacheStore::new());
        Ok(Self {
            connectors: ConnectorRepository::new(Arc::clone(&db)),
            mappings: FieldMappingRepository::new(Arc::clone(&db)),
            vault: CredentialVault::new(CredentialRepository::new(Arc::clone(&db)), test_key_ring()),
            cache: PullCache::new(store.clone()),
            store,
            gateway: Arc::new(OutboundGateway::new(&gateway)?),
            db,
        })
    }

    pub fn pull(&self) -> PullOrchestrator {
        PullOrchestrator::new(
            Arc::new(self.connectors.clone()),
            Arc::new(self.mappings.clone()),
            Arc::new(self.vault.clone()),
            self.cache.clone(),
            Arc::clone(&self.gateway),
        )
    }

    pub fn push(&self) -> PushOrchestrator {
        PushOrchestrator::new(
            Arc::new(self.connectors.clone()),
            Arc::new(self.mappings.clone()),
            Arc::new(self.vault.clone()),
            Arc::clone(&self.gateway),
        )
    }

    /// Creates an enabled connector whose configuration is `config`.
    pub async fn create_connector(
        &self,
        organization_id: Uuid,
        name: &str,
        config: Value,
    ) -> Result<connector::Model> {
        Ok(self
            .connectors
            .create(new_connector(organization_id, name, config))
            .await?)
    }

    pub async fn create_mapping(
        &self,
        organization_id: Uuid,
        connector_id: Uuid,
        form_id: Option<Uuid>,
        form_field: &str,
        connector_field: &str,
        transforms: &[&str],
    ) -> Result<field_mapping::Model> {
        Ok(self
            .mappings
            .create(NewFieldMapping {
                organization_id,
                connector_id,
                form_id,
                form_field: form_field.to_string(),
                connector_field: connector_field.to_string(),
                transforms: transforms.iter().map(|kind| TransformSpec::new(*kind)).collect(),
                required: false,
                default_value: None,
            })
            .await?)
    }
}

#[allow(dead_code)]
pub fn new_connector(organization_id: Uuid, name: &str, config: Value) -> NewConnector {
    NewConnector {
        organization_id,
        definition_id: "priority-cloud".to_string(),
        name: name.to_string(),
        config,
        rate_limit_requests: None,
        rate_limit_window_seconds: None,
        timeout_ms: None,
        is_enabled: true,
    }
}
