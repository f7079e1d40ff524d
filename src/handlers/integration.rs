//! # Integration API Handlers
//!
//! Pull and push execution, pull cache administration and connector health,
//! all scoped to the organization named by the `X-Organization-Id` header.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, OrganizationExtension, OrganizationHeader};
use crate::cache::CacheStats;
use crate::error::{ApiError, HubError};
use crate::gateway::CircuitState;
use crate::models::connector::HealthStatus;
use crate::orchestrator::{PullRequest, PullResult, PushEndpoint, PushRequest, PushResult};
use crate::server::AppState;

/// Body of `POST /integrations/pull`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullBody {
    pub connector_id: Uuid,
    /// Resource type, e.g. `customers`
    pub resource_type: String,
    pub resource_id: String,
    /// Skip the cache read; the fetched value still refreshes the cache
    #[serde(default)]
    pub force_refresh: bool,
}

/// Body of `POST /integrations/push`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushBody {
    pub connector_id: Uuid,
    pub form_id: Uuid,
    pub submission_id: Uuid,
    /// Submission data keyed by form field
    #[schema(value_type = Object)]
    pub data: Value,
    pub endpoint: PushEndpoint,
}

/// Result of `DELETE /cache`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearResponse {
    /// Number of cache entries removed
    pub deleted: u64,
}

/// Stored and live health of a connector
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorHealthResponse {
    pub connector_id: Uuid,
    pub is_enabled: bool,
    /// Health derived from the breaker, or the stored value when the
    /// connector has not been called since startup
    pub health_status: HealthStatus,
    pub circuit_state: CircuitState,
}

/// Fetch one resource from a connector, served from cache when possible
#[utoipa::path(
    post,
    path = "/integrations/pull",
    security(("bearer_auth" = [])),
    params(OrganizationHeader),
    request_body = PullBody,
    responses(
        (status = 200, description = "Resource data mapped to form fields", body = PullResult),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Connector belongs to another organization", body = ApiError),
        (status = 404, description = "Connector not found", body = ApiError),
        (status = 429, description = "Connector rate limit exceeded", body = ApiError),
        (status = 502, description = "External system returned an error", body = ApiError),
        (status = 503, description = "Circuit breaker open", body = ApiError),
        (status = 504, description = "External system timed out", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn pull(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    OrganizationExtension(organization): OrganizationExtension,
    payload: Result<Json<PullBody>, JsonRejection>,
) -> Result<Json<PullResult>, ApiError> {
    let Json(body) = payload?;

    let result = state
        .pull
        .pull_data(PullRequest {
            organization_id: organization.0,
            connector_id: body.connector_id,
            resource_type: body.resource_type,
            resource_id: body.resource_id,
            force_refresh: body.force_refresh,
        })
        .await?;

    Ok(Json(result))
}

/// Map a form submission and write it to a connector
#[utoipa::path(
    post,
    path = "/integrations/push",
    security(("bearer_auth" = [])),
    params(OrganizationHeader),
    request_body = PushBody,
    responses(
        (status = 200, description = "Upstream accepted the record", body = PushResult),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Connector belongs to another organization", body = ApiError),
        (status = 404, description = "Connector not found", body = ApiError),
        (status = 429, description = "Connector rate limit exceeded", body = ApiError),
        (status = 502, description = "External system returned an error", body = ApiError),
        (status = 503, description = "Circuit breaker open", body = ApiError),
        (status = 504, description = "External system timed out", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn push(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    OrganizationExtension(organization): OrganizationExtension,
    payload: Result<Json<PushBody>, JsonRejection>,
) -> Result<Json<PushResult>, ApiError> {
    let Json(body) = payload?;

    let result = state
        .push
        .push_data(PushRequest {
            organization_id: organization.0,
            connector_id: body.connector_id,
            form_id: body.form_id,
            submission_id: body.submission_id,
            data: body.data,
            endpoint: body.endpoint,
        })
        .await?;

    Ok(Json(result))
}

/// Pull cache statistics for the organization
#[utoipa::path(
    get,
    path = "/cache/stats",
    security(("bearer_auth" = [])),
    params(OrganizationHeader),
    responses(
        (status = 200, description = "Cache entry counts", body = CacheStats),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 500, description = "Cache backend failure", body = ApiError)
    ),
    tag = "cache"
)]
pub async fn cache_stats(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    OrganizationExtension(organization): OrganizationExtension,
) -> Result<Json<CacheStats>, ApiError> {
    let stats = state
        .cache
        .get_cache_stats(organization.0)
        .await
        .map_err(HubError::from)?;

    Ok(Json(stats))
}

/// Remove every pull cache entry of the organization
#[utoipa::path(
    delete,
    path = "/cache",
    security(("bearer_auth" = [])),
    params(OrganizationHeader),
    responses(
        (status = 200, description = "Entries removed", body = CacheClearResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 500, description = "Cache backend failure", body = ApiError)
    ),
    tag = "cache"
)]
pub async fn clear_cache(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    OrganizationExtension(organization): OrganizationExtension,
) -> Result<Json<CacheClearResponse>, ApiError> {
    let deleted = state
        .cache
        .clear_org_cache(organization.0)
        .await
        .map_err(HubError::from)?;

    tracing::info!(organization_id = %organization.0, deleted, "Cleared pull cache");
    Ok(Json(CacheClearResponse { deleted }))
}

/// Breaker-derived health of a connector
///
/// A changed live health is written back to the connector row.
#[utoipa::path(
    get,
    path = "/connectors/{id}/health",
    security(("bearer_auth" = [])),
    params(
        OrganizationHeader,
        ("id" = Uuid, Path, description = "Connector identifier")
    ),
    responses(
        (status = 200, description = "Connector health", body = ConnectorHealthResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connector not found", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn connector_health(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    OrganizationExtension(organization): OrganizationExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectorHealthResponse>, ApiError> {
    let connector = state
        .connectors
        .get_by_id(id, organization.0)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("connector {id}")))?;

    let health_status = match state.gateway.connector_health(id) {
        HealthStatus::Unknown => connector.health(),
        live => {
            state
                .connectors
                .update_health_status(id, organization.0, live)
                .await?;
            live
        }
    };

    Ok(Json(ConnectorHealthResponse {
        connector_id: id,
        is_enabled: connector.is_enabled,
        health_status,
        circuit_state: state.gateway.circuit_state(id),
    }))
}
