//! # Error Handling
//!
//! The engine reports failures through [`HubError`], a closed taxonomy whose
//! kinds carry a fixed semantic status and retry classification. The HTTP
//! layer renders them as problem+json via [`ApiError`], with trace id
//! propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::telemetry;

/// Maximum characters of an upstream body kept on a gateway error.
pub const GATEWAY_BODY_LIMIT: usize = 1000;

/// Maximum characters of an upstream body echoed to API clients.
const BODY_SNIPPET_LIMIT: usize = 200;

/// Closed set of failure kinds surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    OrganizationMismatch,
    NotFound,
    Conflict,
    DecryptionFailed,
    RateLimit,
    CircuitBreaker,
    Timeout,
    OutboundGateway,
    Internal,
}

impl ErrorKind {
    /// Semantic HTTP status for this kind
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::OrganizationMismatch => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::DecryptionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::CircuitBreaker => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::OutboundGateway => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code string used in problem+json bodies
    pub fn error_code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_FAILED",
            ErrorKind::OrganizationMismatch => "ORGANIZATION_MISMATCH",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::DecryptionFailed => "DECRYPTION_FAILED",
            ErrorKind::RateLimit => "RATE_LIMITED",
            ErrorKind::CircuitBreaker => "CIRCUIT_OPEN",
            ErrorKind::Timeout => "UPSTREAM_TIMEOUT",
            ErrorKind::OutboundGateway => "GATEWAY_ERROR",
            ErrorKind::Internal => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Engine error. Messages never carry key material, credential plaintext
/// or ciphertext.
#[derive(Debug, Clone, Error)]
pub enum HubError {
    #[error("{0}")]
    Validation(String),
    #[error("connector {connector_id} is disabled")]
    ConnectorDisabled { connector_id: Uuid },
    #[error("connector {connector_id} has no baseUrl configured")]
    MissingBaseUrl { connector_id: Uuid },
    #[error("{0} does not belong to the requesting organization")]
    OrganizationMismatch(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("failed to decrypt credentials")]
    DecryptionFailed,
    #[error("rate limit exceeded for connector {connector_id}")]
    RateLimited {
        connector_id: Uuid,
        retry_after_secs: u64,
        duration_ms: u64,
    },
    #[error("circuit breaker open for connector {connector_id}")]
    CircuitOpen {
        connector_id: Uuid,
        retry_after_secs: u64,
        duration_ms: u64,
    },
    #[error("request to connector {connector_id} timed out after {timeout_ms}ms")]
    Timeout {
        connector_id: Uuid,
        timeout_ms: u64,
        duration_ms: u64,
    },
    #[error("{}", gateway_message(.connector_id, .status))]
    Gateway {
        connector_id: Uuid,
        status: Option<u16>,
        body: Option<String>,
        duration_ms: u64,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

fn gateway_message(connector_id: &Uuid, status: &Option<u16>) -> String {
    match status {
        Some(status) => format!("connector {connector_id} returned HTTP {status}"),
        None => format!("connector {connector_id} could not be reached"),
    }
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::Validation(_)
            | HubError::ConnectorDisabled { .. }
            | HubError::MissingBaseUrl { .. } => ErrorKind::Validation,
            HubError::OrganizationMismatch(_) => ErrorKind::OrganizationMismatch,
            HubError::NotFound(_) => ErrorKind::NotFound,
            HubError::Conflict(_) => ErrorKind::Conflict,
            HubError::DecryptionFailed => ErrorKind::DecryptionFailed,
            HubError::RateLimited { .. } => ErrorKind::RateLimit,
            HubError::CircuitOpen { .. } => ErrorKind::CircuitBreaker,
            HubError::Timeout { .. } => ErrorKind::Timeout,
            HubError::Gateway { .. } => ErrorKind::OutboundGateway,
            HubError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Whether the gateway may retry this failure on its own.
    ///
    /// Rate-limit and open-circuit rejections are left to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            HubError::Timeout { .. } => true,
            HubError::Gateway { status: None, .. } => true,
            HubError::Gateway {
                status: Some(status),
                ..
            } => *status >= 500,
            _ => false,
        }
    }

    /// Elapsed wall-clock time for outbound gateway failures.
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            HubError::RateLimited { duration_ms, .. }
            | HubError::CircuitOpen { duration_ms, .. }
            | HubError::Timeout { duration_ms, .. }
            | HubError::Gateway { duration_ms, .. } => Some(*duration_ms),
            _ => None,
        }
    }

    pub(crate) fn gateway(
        connector_id: Uuid,
        status: Option<u16>,
        body: Option<String>,
        duration_ms: u64,
    ) -> Self {
        HubError::Gateway {
            connector_id,
            status,
            body: body.map(|b| truncate_chars(b, GATEWAY_BODY_LIMIT)),
            duration_ms,
        }
    }
}

impl From<sea_orm::DbErr> for HubError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return HubError::Conflict("resource already exists".to_string());
        }
        HubError::Internal(format!("database error: {error}"))
    }
}

fn truncate_chars(value: String, limit: usize) -> String {
    if value.chars().count() > limit {
        let truncated: String = value.chars().take(limit).collect();
        format!("{truncated}...")
    } else {
        value
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the task-local context (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code_str = code.as_ref();
        code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str)
    })
}

/// Upstream failure information echoed to API clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamErrorDetails {
    pub connector_id: Uuid,
    /// HTTP status from the external system, absent on transport failures
    pub status: Option<u16>,
    /// Response body snippet (truncated)
    pub body_snippet: Option<String>,
    pub duration_ms: u64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        let kind = error.kind();
        let status = kind.status_code();
        let code = kind.error_code();

        match error {
            HubError::RateLimited {
                retry_after_secs, ..
            }
            | HubError::CircuitOpen {
                retry_after_secs, ..
            } => ApiError::new(status, code, &error.to_string())
                .with_retry_after(retry_after_secs.max(1)),
            HubError::Gateway {
                connector_id,
                status: upstream_status,
                ref body,
                duration_ms,
            } => {
                let details = UpstreamErrorDetails {
                    connector_id,
                    status: upstream_status,
                    body_snippet: body
                        .clone()
                        .map(|b| truncate_chars(b, BODY_SNIPPET_LIMIT)),
                    duration_ms,
                };
                ApiError::new(status, code, &error.to_string()).with_details(json!(details))
            }
            HubError::DecryptionFailed => {
                ApiError::new(status, code, "Stored credentials could not be decrypted")
            }
            HubError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                ApiError::new(status, code, "An internal error occurred")
            }
            other => ApiError::new(status, code, &other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
