//! # Data Models
//!
//! SeaORM entities for connectors, their credentials and field mappings.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connector;
pub mod credential;
pub mod field_mapping;

pub use connector::Entity as Connector;
pub use credential::Entity as ConnectorCredential;
pub use field_mapping::Entity as FieldMapping;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "integration-hub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
