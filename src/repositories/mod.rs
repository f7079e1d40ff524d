//! # Repository Layer
//!
//! SeaORM-backed storage for connectors, field mappings and credential rows,
//! plus the lookup traits the orchestrators depend on.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::HubError;
use crate::models::connector::Model as ConnectorModel;
use crate::models::field_mapping::Model as FieldMappingModel;

pub mod connector;
pub mod credential;
pub mod field_mapping;

pub use connector::{ConnectorRepository, ConnectorUpdate, NewConnector};
pub use credential::CredentialRepository;
pub use field_mapping::{
    FieldMappingFilter, FieldMappingRepository, FieldMappingUpdate, NewFieldMapping,
};

/// Resolves connectors for an organization.
#[async_trait]
pub trait ConnectorDirectory: Send + Sync {
    /// Returns `None` when the connector does not exist, is deleted, or belongs
    /// to another organization.
    async fn get_by_id(
        &self,
        connector_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<ConnectorModel>, HubError>;
}

/// Resolves field mappings for the orchestrators.
#[async_trait]
pub trait FieldMappingStore: Send + Sync {
    async fn list(
        &self,
        filter: &FieldMappingFilter,
    ) -> Result<Vec<FieldMappingModel>, HubError>;

    async fn get_by_connector(
        &self,
        connector_id: Uuid,
    ) -> Result<Vec<FieldMappingModel>, HubError>;
}

#[async_trait]
impl ConnectorDirectory for ConnectorRepository {
    async fn get_by_id(
        &self,
        connector_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<ConnectorModel>, HubError> {
        ConnectorRepository::get_by_id(self, connector_id, organization_id).await
    }
}

#[async_trait]
impl FieldMappingStore for FieldMappingRepository {
    async fn list(
        &self,
        filter: &FieldMappingFilter,
    ) -> Result<Vec<FieldMappingModel>, HubError> {
        FieldMappingRepository::list(self, filter).await
    }

    async fn get_by_connector(
        &self,
        connector_id: Uuid,
    ) -> Result<Vec<FieldMappingModel>, HubError> {
        FieldMappingRepository::get_by_connector(self, connector_id).await
    }
}
