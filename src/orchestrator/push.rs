//! Push flow: connector checks, form-to-ERP mapping, gateway call, record id
//! extraction.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    finalize_url, header_name, join_url, resolve_auth, resolve_connector,
    verify_mapping_ownership,
};
use crate::error::HubError;
use crate::gateway::{GatewayRequest, OutboundGateway};
use crate::mapping::{MappingDirection, apply_mappings, compile_rules, effective_mappings};
use crate::repositories::{ConnectorDirectory, FieldMappingFilter, FieldMappingStore};
use crate::telemetry::PUSH_REQUESTS_TOTAL;
use crate::vault::CredentialSource;

/// Response fields checked, in order, for the created record's id.
const RECORD_ID_FIELDS: [&str; 10] = [
    "id", "ID", "recordId", "record_id", "DocEntry", "DocNum", "CUSTNAME", "ORDNAME", "IVNUM",
    "_id",
];

/// Write methods accepted for a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PushMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl PushMethod {
    pub fn as_method(self) -> Method {
        match self {
            PushMethod::Post => Method::POST,
            PushMethod::Put => Method::PUT,
            PushMethod::Patch => Method::PATCH,
            PushMethod::Delete => Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushEndpoint {
    pub method: PushMethod,
    /// Path relative to the connector's `baseUrl`
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub organization_id: Uuid,
    pub connector_id: Uuid,
    pub form_id: Uuid,
    pub submission_id: Uuid,
    pub data: Value,
    pub endpoint: PushEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erp_record_id: Option<String>,
    pub status_code: u16,
    pub duration_ms: u64,
    #[schema(value_type = Object)]
    pub result: Value,
}

#[derive(Clone)]
pub struct PushOrchestrator {
    connectors: Arc<dyn ConnectorDirectory>,
    mappings: Arc<dyn FieldMappingStore>,
    credentials: Arc<dyn CredentialSource>,
    gateway: Arc<OutboundGateway>,
}

impl std::fmt::Debug for PushOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushOrchestrator")
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl PushOrchestrator {
    pub fn new(
        connectors: Arc<dyn ConnectorDirectory>,
        mappings: Arc<dyn FieldMappingStore>,
        credentials: Arc<dyn CredentialSource>,
        gateway: Arc<OutboundGateway>,
    ) -> Self {
        Self {
            connectors,
            mappings,
            credentials,
            gateway,
        }
    }

    pub async fn push_data(&self, request: PushRequest) -> Result<PushResult, HubError> {
        let started = Instant::now();
        let outcome = self.push_inner(&request, started).await;

        let label = if outcome.is_ok() { "success" } else { "error" };
        counter!(PUSH_REQUESTS_TOTAL, "outcome" => label).increment(1);
        if let Err(err) = &outcome {
            warn!(
                organization_id = %request.organization_id,
                connector_id = %request.connector_id,
                submission_id = %request.submission_id,
                error_code = err.kind().error_code(),
                error = %err,
                "Push failed"
            );
        }
        outcome
    }

    async fn push_inner(
        &self,
        request: &PushRequest,
        started: Instant,
    ) -> Result<PushResult, HubError> {
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
        let base_url = connector.base_url().ok_or(HubError::MissingBaseUrl {
            connector_id: connector.id,
        })?;

        let auth = resolve_auth(&self.credentials, connector.id).await?;

        let scoped = self
            .mappings
            .list(&FieldMappingFilter::for_form(
                request.organization_id,
                connector.id,
                request.form_id,
            ))
            .await?;
        verify_mapping_ownership(&scoped, request.organization_id)?;
        let (form_specific, templates): (Vec<_>, Vec<_>) =
            scoped.into_iter().partition(|mapping| !mapping.is_template());
        let mappings = effective_mappings(form_specific, templates);

        let body = if mappings.is_empty() {
            request.data.clone()
        } else {
            let rules = compile_rules(&mappings)?;
            apply_mappings(&request.data, &rules, MappingDirection::FormToErp)?
        };

        let url = finalize_url(&join_url(base_url, endpoint_path(&request.endpoint.path)?))?;
        let mut headers = caller_headers(&request.endpoint.headers)?;
        // auth headers take precedence over caller headers
        headers.extend(auth.headers);

        let gateway_request = GatewayRequest {
            headers,
            body: Some(body),
            auth: auth.auth,
            timeout: connector.timeout(),
            rate_limit: connector.rate_limit(),
            ..GatewayRequest::new(connector.id, request.endpoint.method.as_method(), url)
        };
        let response = self.gateway.execute(&gateway_request).await?;

        let erp_record_id = extract_record_id(&response.body);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            organization_id = %request.organization_id,
            connector_id = %connector.id,
            form_id = %request.form_id,
            submission_id = %request.submission_id,
            status = response.status,
            mapped_fields = mappings.len(),
            duration_ms,
            "Pushed submission to connector"
        );

        Ok(PushResult {
            success: true,
            erp_record_id,
            status_code: response.status,
            duration_ms,
            result: response.body,
        })
    }
}

/// Rejects absolute URLs so a push can only target the connector's host.
fn endpoint_path(path: &str) -> Result<&str, HubError> {
    let trimmed = path.trim();
    if trimmed.contains("://") || trimmed.starts_with("//") {
        return Err(HubError::Validation(
            "endpoint path must be relative to the connector baseUrl".to_string(),
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(HubError::Validation(
            "endpoint path must not contain control characters".to_string(),
        ));
    }
    Ok(trimmed)
}

fn caller_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, HubError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let value = HeaderValue::from_str(value)
            .map_err(|_| HubError::Validation(format!("invalid value for header {name}")))?;
        map.insert(header_name(name)?, value);
    }
    Ok(map)
}

/// First identifier-like field of the response, stringified.
pub(crate) fn extract_record_id(body: &Value) -> Option<String> {
    let object = body.as_object()?;
    RECORD_ID_FIELDS
        .iter()
        .find_map(|field| match object.get(*field)? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}
