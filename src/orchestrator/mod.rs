//! # Pull/Push Orchestration
//!
//! Composes the connector directory, credential vault, field mapping store,
//! pull cache and outbound gateway into the two integration flows. Organization
//! ownership is re-checked here even though the stores already filter by it.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use uuid::Uuid;

use crate::error::HubError;
use crate::gateway::GatewayAuth;
use crate::models::connector::Model as ConnectorModel;
use crate::models::credential::AuthType;
use crate::models::field_mapping::Model as FieldMappingModel;
use crate::repositories::ConnectorDirectory;
use crate::vault::CredentialSource;

pub mod pull;
pub mod push;

pub use pull::{PullMetadata, PullOrchestrator, PullRequest, PullResult};
pub use push::{PushEndpoint, PushMethod, PushOrchestrator, PushRequest, PushResult};

/// Header used for `api_key` credentials without a `headerName`.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Auth material resolved for one outbound call.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedAuth {
    pub auth: GatewayAuth,
    pub headers: HeaderMap,
}

/// Loads a connector and confirms it belongs to `organization_id`.
pub(crate) async fn resolve_connector(
    connectors: &Arc<dyn ConnectorDirectory>,
    connector_id: Uuid,
    organization_id: Uuid,
) -> Result<ConnectorModel, HubError> {
    let connector = connectors
        .get_by_id(connector_id, organization_id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("connector {connector_id}")))?;

    if connector.organization_id != organization_id {
        tracing::warn!(
            organization_id = %organization_id,
            connector_id = %connector_id,
            "Connector lookup returned a connector owned by another organization"
        );
        return Err(HubError::OrganizationMismatch(format!(
            "connector {connector_id}"
        )));
    }
    Ok(connector)
}

/// Rejects the whole set if any mapping belongs to another organization.
pub(crate) fn verify_mapping_ownership(
    mappings: &[FieldMappingModel],
    organization_id: Uuid,
) -> Result<(), HubError> {
    match mappings
        .iter()
        .find(|mapping| mapping.organization_id != organization_id)
    {
        Some(mapping) => {
            tracing::warn!(
                organization_id = %organization_id,
                mapping_id = %mapping.id,
                "Field mapping owned by another organization"
            );
            Err(HubError::OrganizationMismatch(format!(
                "field mapping {}",
                mapping.id
            )))
        }
        None => Ok(()),
    }
}

/// Builds request auth from the connector's stored credentials.
///
/// No stored credentials means an unauthenticated request.
pub(crate) async fn resolve_auth(
    credentials: &Arc<dyn CredentialSource>,
    connector_id: Uuid,
) -> Result<ResolvedAuth, HubError> {
    let Some(stored) = credentials.get_credentials(connector_id).await? else {
        return Ok(ResolvedAuth::default());
    };
    let secrets = &stored.credentials;
    let mut resolved = ResolvedAuth::default();

    match stored.auth_type {
        AuthType::Basic => {
            let (Some(username), Some(password)) = (
                credential_str(secrets, "username"),
                credential_str(secrets, "password"),
            ) else {
                return Err(HubError::Validation(
                    "basic credentials require username and password".to_string(),
                ));
            };
            resolved.auth = GatewayAuth::Basic {
                username: username.to_string(),
                password: password.to_string(),
            };
        }
        AuthType::ApiKey => {
            let Some(value) = credential_str(secrets, "apiKey") else {
                return Err(HubError::Validation(
                    "api_key credentials require apiKey".to_string(),
                ));
            };
            let header = credential_str(secrets, "headerName").unwrap_or(DEFAULT_API_KEY_HEADER);
            header_name(header)?;
            resolved.auth = GatewayAuth::ApiKey {
                header: header.to_string(),
                value: value.to_string(),
            };
        }
        AuthType::OAuth2 => {
            let token = match credentials.get_oauth2_tokens(connector_id).await? {
                Some(tokens) => format!("Bearer {}", tokens.access_token),
                None => match credential_str(secrets, "accessToken") {
                    Some(token) => format!("Bearer {token}"),
                    None => {
                        return Err(HubError::Validation(
                            "oauth2 connector has no access token".to_string(),
                        ));
                    }
                },
            };
            resolved
                .headers
                .insert(AUTHORIZATION, sensitive_value(&token)?);
        }
        AuthType::Custom => {
            if let Some(headers) = secrets.get("headers").and_then(Value::as_object) {
                for (name, value) in headers {
                    let Some(value) = value.as_str() else {
                        return Err(HubError::Validation(format!(
                            "custom credential header '{name}' must be a string"
                        )));
                    };
                    resolved
                        .headers
                        .insert(header_name(name)?, sensitive_value(value)?);
                }
            }
        }
        AuthType::Session => {}
    }

    Ok(resolved)
}

fn credential_str<'a>(credentials: &'a Value, field: &str) -> Option<&'a str> {
    credentials
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

pub(crate) fn header_name(name: &str) -> Result<HeaderName, HubError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HubError::Validation(format!("invalid header name: {name}")))
}

/// Header value marked sensitive; the value never appears in the error.
fn sensitive_value(value: &str) -> Result<HeaderValue, HubError> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| HubError::Validation("credential contains an invalid header value".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Joins a base URL and a path with exactly one slash between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim().trim_start_matches('/')
    )
}

/// Parses the final URL, percent-encoding what needs it.
pub(crate) fn finalize_url(raw: &str) -> Result<String, HubError> {
    let url = url::Url::parse(raw)
        .map_err(|err| HubError::Validation(format!("invalid connector URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HubError::Validation(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        )));
    }
    Ok(url.to_string())
}
