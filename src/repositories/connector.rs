//! Connector repository for database operations
//!
//! Every read and write is scoped by organization id in the query itself, and
//! soft-deleted rows are invisible to all lookups.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::HubError;
use crate::models::connector::{self, Entity as Connector, HealthStatus};
use crate::transforms::is_bidi_override;

/// Longest accepted connector name, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Fields required to create a connector.
#[derive(Debug, Clone)]
pub struct NewConnector {
    pub organization_id: Uuid,
    pub definition_id: String,
    pub name: String,
    pub config: JsonValue,
    pub rate_limit_requests: Option<i32>,
    pub rate_limit_window_seconds: Option<i32>,
    pub timeout_ms: Option<i64>,
    pub is_enabled: bool,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConnectorUpdate {
    pub name: Option<String>,
    pub config: Option<JsonValue>,
    pub rate_limit_requests: Option<Option<i32>>,
    pub rate_limit_window_seconds: Option<Option<i32>>,
    pub timeout_ms: Option<Option<i64>>,
    pub is_enabled: Option<bool>,
}

/// Repository for connector database operations
#[derive(Debug, Clone)]
pub struct ConnectorRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ConnectorRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewConnector) -> Result<connector::Model, HubError> {
        let name = sanitize_name(&new.name)?;
        validate_config(&new.config)?;
        if new.definition_id.trim().is_empty() {
            return Err(HubError::Validation(
                "definitionId must not be empty".to_string(),
            ));
        }
        validate_limits(new.rate_limit_requests, new.rate_limit_window_seconds, new.timeout_ms)?;
        self.ensure_name_available(new.organization_id, &name, None)
            .await?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let active = connector::ActiveModel {
            id: Set(id),
            organization_id: Set(new.organization_id),
            definition_id: Set(new.definition_id.trim().to_string()),
            name: Set(name),
            config: Set(new.config),
            rate_limit_requests: Set(new.rate_limit_requests),
            rate_limit_window_seconds: Set(new.rate_limit_window_seconds),
            timeout_ms: Set(new.timeout_ms),
            is_enabled: Set(new.is_enabled),
            health_status: Set(HealthStatus::Unknown.as_str().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };

        Connector::insert(active).exec(&*self.db).await?;

        Connector::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| HubError::Internal(format!("connector {id} not persisted")))
    }

    /// Finds a live connector by id within an organization
    pub async fn get_by_id(
        &self,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<connector::Model>, HubError> {
        Ok(Connector::find_by_id(id)
            .filter(connector::Column::OrganizationId.eq(organization_id))
            .filter(connector::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await?)
    }

    /// Lists live connectors for an organization ordered by name
    pub async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<connector::Model>, HubError> {
        Ok(Connector::find()
            .filter(connector::Column::OrganizationId.eq(organization_id))
            .filter(connector::Column::DeletedAt.is_null())
            .order_by_asc(connector::Column::Name)
            .order_by_asc(connector::Column::Id)
            .all(&*self.db)
            .await?)
    }

    pub async fn update(
        &self,
        id: Uuid,
        organization_id: Uuid,
        update: ConnectorUpdate,
    ) -> Result<connector::Model, HubError> {
        let existing = self
            .get_by_id(id, organization_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("connector {id}")))?;

        let rate_limit_requests = update
            .rate_limit_requests
            .unwrap_or(existing.rate_limit_requests);
        let rate_limit_window_seconds = update
            .rate_limit_window_seconds
            .unwrap_or(existing.rate_limit_window_seconds);
        let timeout_ms = update.timeout_ms.unwrap_or(existing.timeout_ms);
        validate_limits(rate_limit_requests, rate_limit_window_seconds, timeout_ms)?;

        let mut model: connector::ActiveModel = existing.clone().into();

        if let Some(name) = update.name {
            let name = sanitize_name(&name)?;
            if name != existing.name {
                self.ensure_name_available(organization_id, &name, Some(id))
                    .await?;
            }
            model.name = Set(name);
        }
        if let Some(config) = update.config {
            validate_config(&config)?;
            model.config = Set(config);
        }
        if let Some(is_enabled) = update.is_enabled {
            model.is_enabled = Set(is_enabled);
        }
        model.rate_limit_requests = Set(rate_limit_requests);
        model.rate_limit_window_seconds = Set(rate_limit_window_seconds);
        model.timeout_ms = Set(timeout_ms);
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Marks a connector deleted; its name becomes available again.
    ///
    /// Returns `false` when no live connector matched.
    pub async fn soft_delete(&self, id: Uuid, organization_id: Uuid) -> Result<bool, HubError> {
        let Some(existing) = self.get_by_id(id, organization_id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let mut model: connector::ActiveModel = existing.into();
        model.deleted_at = Set(Some(now.into()));
        model.updated_at = Set(now.into());
        model.update(&*self.db).await?;
        Ok(true)
    }

    pub async fn update_health_status(
        &self,
        id: Uuid,
        organization_id: Uuid,
        status: HealthStatus,
    ) -> Result<(), HubError> {
        let existing = self
            .get_by_id(id, organization_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("connector {id}")))?;

        if existing.health() == status {
            return Ok(());
        }

        let mut model: connector::ActiveModel = existing.into();
        model.health_status = Set(status.as_str().to_string());
        model.updated_at = Set(Utc::now().into());
        model.update(&*self.db).await?;
        Ok(())
    }

    async fn ensure_name_available(
        &self,
        organization_id: Uuid,
        name: &str,
        exclude: Option<Uuid>,
    ) -> Result<(), HubError> {
        let mut query = Connector::find()
            .filter(connector::Column::OrganizationId.eq(organization_id))
            .filter(connector::Column::Name.eq(name))
            .filter(connector::Column::DeletedAt.is_null());
        if let Some(exclude) = exclude {
            query = query.filter(connector::Column::Id.ne(exclude));
        }

        if query.one(&*self.db).await?.is_some() {
            return Err(HubError::Conflict(format!(
                "a connector named '{name}' already exists"
            )));
        }
        Ok(())
    }
}

/// Strip bidi override controls and surrounding whitespace, then enforce length.
pub fn sanitize_name(raw: &str) -> Result<String, HubError> {
    let cleaned: String = raw.chars().filter(|c| !is_bidi_override(*c)).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(HubError::Validation(
            "connector name must not be empty".to_string(),
        ));
    }
    if cleaned.chars().count() > MAX_NAME_LEN {
        return Err(HubError::Validation(format!(
            "connector name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(cleaned.to_string())
}

fn validate_config(config: &JsonValue) -> Result<(), HubError> {
    let Some(object) = config.as_object() else {
        return Err(HubError::Validation(
            "connector config must be a JSON object".to_string(),
        ));
    };

    match object.get("baseUrl").and_then(JsonValue::as_str) {
        Some(url) if !url.trim().is_empty() => {}
        _ => {
            return Err(HubError::Validation(
                "connector config must contain a non-empty baseUrl".to_string(),
            ));
        }
    }

    if let Some(endpoints) = object.get("endpoints")
        && !endpoints
            .as_object()
            .is_some_and(|map| map.values().all(JsonValue::is_string))
    {
        return Err(HubError::Validation(
            "connector endpoints must map resource types to path strings".to_string(),
        ));
    }

    Ok(())
}

fn validate_limits(
    requests: Option<i32>,
    window_seconds: Option<i32>,
    timeout_ms: Option<i64>,
) -> Result<(), HubError> {
    if requests.is_some_and(|r| r <= 0) || window_seconds.is_some_and(|w| w <= 0) {
        return Err(HubError::Validation(
            "rate limit requests and windowSeconds must be positive".to_string(),
        ));
    }
    if requests.is_some() != window_seconds.is_some() {
        return Err(HubError::Validation(
            "rate limit requires both requests and windowSeconds".to_string(),
        ));
    }
    if timeout_ms.is_some_and(|t| t <= 0) {
        return Err(HubError::Validation(
            "timeoutMs must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_name_strips_bidi_overrides() {
        let name = sanitize_name("  \u{202E}פריוריטי\u{2066} ERP\u{2069} ").unwrap();
        assert_eq!(name, "פריוריטי ERP");
    }

    #[test]
    fn test_sanitize_name_rejects_empty_and_long() {
        assert!(sanitize_name("\u{202A}\u{202C}  ").is_err());
        assert!(sanitize_name(&"א".repeat(MAX_NAME_LEN)).is_ok());
        assert!(sanitize_name(&"א".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_config_requires_base_url() {
        assert!(validate_config(&json!({"baseUrl": "https://erp"})).is_ok());
        assert!(validate_config(&json!({"baseUrl": ""})).is_err());
        assert!(validate_config(&json!({"company": "x"})).is_err());
        assert!(validate_config(&json!("https://erp")).is_err());
        assert!(
            validate_config(&json!({"baseUrl": "https://erp", "endpoints": {"customer": 1}}))
                .is_err()
        );
    }

    #[test]
    fn test_limits_validation() {
        assert!(validate_limits(Some(10), Some(60), Some(5000)).is_ok());
        assert!(validate_limits(None, None, None).is_ok());
        assert!(validate_limits(Some(10), None, None).is_err());
        assert!(validate_limits(Some(0), Some(60), None).is_err());
        assert!(validate_limits(None, None, Some(0)).is_err());
    }
}
