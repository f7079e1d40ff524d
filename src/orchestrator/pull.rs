//! Pull flow: cache, connector, gateway `GET`, ERP-to-form mapping, cache write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{finalize_url, join_url, resolve_auth, resolve_connector, verify_mapping_ownership};
use crate::cache::{PullCache, PullCacheKey};
use crate::error::HubError;
use crate::gateway::{GatewayRequest, OutboundGateway};
use crate::mapping::{MappingDirection, apply_mappings, compile_rules};
use crate::models::connector::Model as ConnectorModel;
use crate::repositories::{ConnectorDirectory, FieldMappingStore};
use crate::vault::CredentialSource;

/// Placeholders substituted with the requested resource id.
const RESOURCE_ID_PLACEHOLDERS: [&str; 7] = [
    "{resourceId}",
    "{id}",
    "{customerId}",
    "{orderId}",
    "{invoiceId}",
    "{productId}",
    "{itemId}",
];

const COMPANY_PLACEHOLDER: &str = "{company}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub organization_id: Uuid,
    pub connector_id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub force_refresh: bool,
}

/// Exactly one of `cachedAt` / `fetchedAt`, depending on where the data came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum PullMetadata {
    Cached {
        #[serde(rename = "cachedAt")]
        cached_at: DateTime<Utc>,
    },
    Fetched {
        #[serde(rename = "fetchedAt")]
        fetched_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    #[schema(value_type = Object)]
    pub data: Value,
    pub from_cache: bool,
    pub duration_ms: u64,
    pub metadata: PullMetadata,
}

#[derive(Clone)]
pub struct PullOrchestrator {
    connectors: Arc<dyn ConnectorDirectory>,
    mappings: Arc<dyn FieldMappingStore>,
    credentials: Arc<dyn CredentialSource>,
    cache: PullCache,
    gateway: Arc<OutboundGateway>,
}

impl std::fmt::Debug for PullOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullOrchestrator")
            .field("cache", &self.cache)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl PullOrchestrator {
    pub fn new(
        connectors: Arc<dyn ConnectorDirectory>,
        mappings: Arc<dyn FieldMappingStore>,
        credentials: Arc<dyn CredentialSource>,
        cache: PullCache,
        gateway: Arc<OutboundGateway>,
    ) -> Self {
        Self {
            connectors,
            mappings,
            credentials,
            cache,
            gateway,
        }
    }

    pub async fn pull_data(&self, request: PullRequest) -> Result<PullResult, HubError> {
        let started = Instant::now();
        validate_resource_type(&request.resource_type)?;
        validate_resource_id(&request.resource_id)?;

        let key = PullCacheKey::new(
            request.organization_id,
            request.connector_id,
            request.resource_type.as_str(),
            request.resource_id.as_str(),
        );

        if !request.force_refresh {
            match self.cache.get_cached_data(&key).await {
                Ok(Some(entry)) => {
                    info!(
                        organization_id = %request.organization_id,
                        connector_id = %request.connector_id,
                        resource_type = %request.resource_type,
                        duration_ms = elapsed_ms(started),
                        "Pull served from cache"
                    );
                    return Ok(PullResult {
                        data: entry.data,
                        from_cache: true,
                        duration_ms: elapsed_ms(started),
                        metadata: PullMetadata::Cached {
                            cached_at: entry.cached_at,
                        },
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        organization_id = %request.organization_id,
                        connector_id = %request.connector_id,
                        error = %err,
                        "Pull cache read failed; fetching from connector"
                    );
                }
            }
        }

        let connector = resolve_connector(
            &self.connectors,
            request.connector_id,
            request.organization_id,
        )
        .await?;
        if !connector.is_enabled {
            return Err(HubError::ConnectorDisabled {
                connector_id: connector.id,
            });
        }
        let url = build_pull_url(&connector, &request.resource_type, &request.resource_id)?;
        let auth = resolve_auth(&self.credentials, connector.id).await?;

        let gateway_request = GatewayRequest {
            headers: auth.headers,
            auth: auth.auth,
            timeout: connector.timeout(),
            rate_limit: connector.rate_limit(),
            ..GatewayRequest::new(connector.id, Method::GET, url)
        };
        let response = self.gateway.execute(&gateway_request).await?;

        let mappings = self.mappings.get_by_connector(connector.id).await?;
        verify_mapping_ownership(&mappings, request.organization_id)?;
        let data = if mappings.is_empty() {
            response.body
        } else {
            let rules = compile_rules(&mappings)?;
            apply_mappings(&response.body, &rules, MappingDirection::ErpToForm)?
        };

        if let Err(err) = self.cache.set_cached_data(&key, &data, None).await {
            warn!(
                organization_id = %request.organization_id,
                connector_id = %request.connector_id,
                error = %err,
                "Pull cache write failed"
            );
        }

        let duration_ms = elapsed_ms(started);
        info!(
            organization_id = %request.organization_id,
            connector_id = %request.connector_id,
            resource_type = %request.resource_type,
            mapped_fields = mappings.len(),
            duration_ms,
            "Pulled resource from connector"
        );

        Ok(PullResult {
            data,
            from_cache: false,
            duration_ms,
            metadata: PullMetadata::Fetched {
                fetched_at: Utc::now(),
            },
        })
    }
}

fn validate_resource_type(resource_type: &str) -> Result<(), HubError> {
    let valid = !resource_type.is_empty()
        && resource_type.len() <= 64
        && resource_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(HubError::Validation(
            "resourceType must be 1-64 characters of letters, digits, '_' or '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_resource_id(resource_id: &str) -> Result<(), HubError> {
    if resource_id.is_empty() || resource_id.chars().count() > 255 {
        return Err(HubError::Validation(
            "resourceId must be 1-255 characters".to_string(),
        ));
    }
    // URL parsing reads a backslash as '/' for http(s)
    if resource_id
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '?' | '#') || c.is_control())
    {
        return Err(HubError::Validation(
            "resourceId must not contain '/', '\\', '?', '#' or control characters".to_string(),
        ));
    }
    if is_dot_segment(resource_id) {
        return Err(HubError::Validation(
            "resourceId must not be '.' or '..'".to_string(),
        ));
    }
    Ok(())
}

/// True when the id would be read as a `.` or `..` path segment, including
/// the percent-encoded `%2e` forms URL parsers also resolve.
fn is_dot_segment(resource_id: &str) -> bool {
    let decoded = resource_id.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Resolves the endpoint template for `resource_type` against the connector's
/// base URL. Without a template the path is `/{resourceType}/{resourceId}`.
pub(crate) fn build_pull_url(
    connector: &ConnectorModel,
    resource_type: &str,
    resource_id: &str,
) -> Result<String, HubError> {
    let base = connector.base_url().ok_or(HubError::MissingBaseUrl {
        connector_id: connector.id,
    })?;

    let mut path = connector
        .endpoint_template(resource_type)
        .map(str::to_string)
        .unwrap_or_else(|| format!("/{resource_type}/{{resourceId}}"));

    // company first so a resource id can never inject the company placeholder
    if path.contains(COMPANY_PLACEHOLDER) {
        let company = connector.company().ok_or_else(|| {
            HubError::Validation(format!(
                "endpoint for '{resource_type}' needs a company but the connector has none"
            ))
        })?;
        path = path.replace(COMPANY_PLACEHOLDER, company);
    }
    for placeholder in RESOURCE_ID_PLACEHOLDERS {
        path = path.replace(placeholder, resource_id);
    }
    // a resource id may legitimately contain braces, so check the template itself
    if let Some(template) = connector.endpoint_template(resource_type) {
        let mut leftover = template.to_string();
        for placeholder in RESOURCE_ID_PLACEHOLDERS
            .into_iter()
            .chain(std::iter::once(COMPANY_PLACEHOLDER))
        {
            leftover = leftover.replace(placeholder, "");
        }
        if leftover.contains('{') {
            return Err(HubError::Validation(format!(
                "endpoint template for '{resource_type}' has an unknown placeholder"
            )));
        }
    }

    finalize_url(&join_url(base, &path))
}
