//! # Transform API Handlers
//!
//! Dry-run execution and validation of transform chains, used by mapping
//! editors before a chain is saved on a field mapping.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::{OperatorAuth, OrganizationHeader};
use crate::error::{ApiError, HubError};
use crate::server::AppState;
use crate::transforms::{Transform, TransformExecution, TransformSpec, execute_transforms, validate_transforms};

/// Body of `POST /transforms/preview`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PreviewTransformsBody {
    /// Input value fed to the first transform
    #[schema(value_type = Object)]
    pub value: Value,
    pub transforms: Vec<TransformSpec>,
}

/// Body of `POST /transforms/validate`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateTransformsBody {
    pub transforms: Vec<TransformSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTransformsResponse {
    pub valid: bool,
    /// First problem found in the chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub available_transforms: Vec<String>,
}

/// Run a transform chain against a sample value, reporting every step
#[utoipa::path(
    post,
    path = "/transforms/preview",
    security(("bearer_auth" = [])),
    params(OrganizationHeader),
    request_body = PreviewTransformsBody,
    responses(
        (status = 200, description = "Output of each step", body = TransformExecution),
        (status = 400, description = "Unknown transform, bad params or unsupported input", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "transforms"
)]
pub async fn preview_transforms(
    State(_state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<PreviewTransformsBody>, JsonRejection>,
) -> Result<Json<TransformExecution>, ApiError> {
    let Json(body) = payload?;
    let execution = execute_transforms(body.value, &body.transforms).map_err(HubError::from)?;
    Ok(Json(execution))
}

/// Check a transform chain against the registry without running it
#[utoipa::path(
    post,
    path = "/transforms/validate",
    security(("bearer_auth" = [])),
    params(OrganizationHeader),
    request_body = ValidateTransformsBody,
    responses(
        (status = 200, description = "Validation outcome", body = ValidateTransformsResponse),
        (status = 400, description = "Malformed request body", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "transforms"
)]
pub async fn validate_transform_chain(
    State(_state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<ValidateTransformsBody>, JsonRejection>,
) -> Result<Json<ValidateTransformsResponse>, ApiError> {
    let Json(body) = payload?;
    let error = validate_transforms(&body.transforms)
        .err()
        .map(|err| err.to_string());

    Ok(Json(ValidateTransformsResponse {
        valid: error.is_none(),
        error,
        available_transforms: Transform::REGISTRY.iter().map(|name| name.to_string()).collect(),
    }))
}
