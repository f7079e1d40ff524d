//! Connector entity model
//!
//! A connector binds one organization to one ERP/CRM definition. Its JSON
//! configuration carries the `baseUrl`, an optional `company` and an optional
//! `endpoints` map of resource type to path template.

use std::{fmt, str::FromStr, time::Duration};

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connectors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning organization; fixed for the connector's lifetime
    pub organization_id: Uuid,

    /// Catalog definition (e.g. `priority-cloud`, `sap-b1`)
    pub definition_id: String,

    /// Display name, bidi controls stripped; unique per organization among live rows
    pub name: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub config: JsonValue,

    pub rate_limit_requests: Option<i32>,

    pub rate_limit_window_seconds: Option<i32>,

    pub timeout_ms: Option<i64>,

    pub is_enabled: bool,

    /// One of `unknown|healthy|degraded|unhealthy`
    pub health_status: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    /// Soft-delete marker
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::credential::Entity")]
    Credential,
    #[sea_orm(has_many = "super::field_mapping::Entity")]
    FieldMappings,
}

impl Related<super::credential::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Credential.def()
    }
}

impl Related<super::field_mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FieldMappings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Fixed-window request budget for a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

impl Model {
    pub fn base_url(&self) -> Option<&str> {
        self.config
            .get("baseUrl")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn company(&self) -> Option<&str> {
        self.config
            .get("company")
            .and_then(JsonValue::as_str)
            .filter(|company| !company.is_empty())
    }

    /// Path template configured for a resource type.
    pub fn endpoint_template(&self, resource_type: &str) -> Option<&str> {
        self.config
            .get("endpoints")
            .and_then(|endpoints| endpoints.get(resource_type))
            .and_then(JsonValue::as_str)
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        let requests = u32::try_from(self.rate_limit_requests?).ok()?;
        let window_seconds = u64::try_from(self.rate_limit_window_seconds?).ok()?;
        (requests > 0 && window_seconds > 0).then(|| RateLimit {
            requests,
            window: Duration::from_secs(window_seconds),
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn health(&self) -> HealthStatus {
        self.health_status.parse().unwrap_or(HealthStatus::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(HealthStatus::Unknown),
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn connector(config: JsonValue) -> Model {
        Model {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            definition_id: "priority-cloud".to_string(),
            name: "Priority".to_string(),
            config,
            rate_limit_requests: None,
            rate_limit_window_seconds: None,
            timeout_ms: None,
            is_enabled: true,
            health_status: "unknown".to_string(),
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_config_accessors() {
        let model = connector(json!({
            "baseUrl": " https://erp.example.com ",
            "company": "demo",
            "endpoints": {"customer": "/api/customers/{customerId}"}
        }));

        assert_eq!(model.base_url(), Some("https://erp.example.com"));
        assert_eq!(model.company(), Some("demo"));
        assert_eq!(
            model.endpoint_template("customer"),
            Some("/api/customers/{customerId}")
        );
        assert_eq!(model.endpoint_template("order"), None);
    }

    #[test]
    fn test_blank_base_url_is_absent() {
        assert_eq!(connector(json!({"baseUrl": "  "})).base_url(), None);
        assert_eq!(connector(json!({})).base_url(), None);
    }

    #[test]
    fn test_rate_limit_requires_both_positive_values() {
        let mut model = connector(json!({}));
        assert_eq!(model.rate_limit(), None);

        model.rate_limit_requests = Some(10);
        assert_eq!(model.rate_limit(), None);

        model.rate_limit_window_seconds = Some(60);
        assert_eq!(
            model.rate_limit(),
            Some(RateLimit {
                requests: 10,
                window: Duration::from_secs(60)
            })
        );

        model.rate_limit_requests = Some(0);
        assert_eq!(model.rate_limit(), None);
    }

    #[test]
    fn test_timeout_and_health() {
        let mut model = connector(json!({}));
        model.timeout_ms = Some(2500);
        model.health_status = "degraded".to_string();

        assert_eq!(model.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(model.health(), HealthStatus::Degraded);

        model.timeout_ms = Some(-1);
        model.health_status = "bogus".to_string();
        assert_eq!(model.timeout(), None);
        assert_eq!(model.health(), HealthStatus::Unknown);
    }
}
