//! # Outbound Gateway
//!
//! Executes one HTTP call against an external system per [`OutboundGateway::execute`],
//! guarded per connector by, in order: a fixed-window rate limit, a circuit
//! breaker, a timeout, and bounded retries that re-enter the first two checks.
//!
//! Guard state lives in memory, one [`ConnectorGuard`] per connector id. The
//! registry lock is only held to look up a guard; each guard has its own lock,
//! never held across I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, histogram};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::HubError;
use crate::models::connector::{HealthStatus, RateLimit};
use crate::telemetry::{
    GATEWAY_CIRCUIT_OPEN_TOTAL, GATEWAY_REQUEST_DURATION_MS, GATEWAY_REQUESTS_TOTAL,
};

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{BreakerPolicy, CircuitBreaker, CircuitState};
pub use rate_limiter::FixedWindowLimiter;
pub use retry::RetryPolicy;

/// Authentication applied to an outbound request.
///
/// Bearer tokens are supplied by the caller as an `Authorization` header.
#[derive(Clone, Default)]
pub enum GatewayAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        header: String,
        value: String,
    },
}

impl fmt::Debug for GatewayAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayAuth::None => f.write_str("None"),
            GatewayAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            GatewayAuth::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("value", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct GatewayRequest {
    pub connector_id: Uuid,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub auth: GatewayAuth,
    /// Falls back to the gateway default.
    pub timeout: Option<Duration>,
    /// `None` disables rate limiting for the connector.
    pub rate_limit: Option<RateLimit>,
}

impl GatewayRequest {
    pub fn new(connector_id: Uuid, method: Method, url: impl Into<String>) -> Self {
        Self {
            connector_id,
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            auth: GatewayAuth::None,
            timeout: None,
            rate_limit: None,
        }
    }
}

impl fmt::Debug for GatewayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRequest")
            .field("connector_id", &self.connector_id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    /// Parsed JSON body; non-JSON bodies become a JSON string, empty bodies null.
    pub body: Value,
    pub duration_ms: u64,
    pub attempts: u32,
}

/// Limiter and breaker for one connector.
#[derive(Debug)]
pub struct ConnectorGuard {
    limiter: Option<FixedWindowLimiter>,
    breaker: CircuitBreaker,
}

impl ConnectorGuard {
    fn new(policy: BreakerPolicy) -> Self {
        Self {
            limiter: None,
            breaker: CircuitBreaker::new(policy),
        }
    }

    /// Rate limit first, then breaker. A request rejected by the breaker has
    /// already consumed rate budget, as it was admitted by the limiter.
    fn admit(&mut self, rate_limit: Option<RateLimit>, now: Instant) -> Result<(), Rejection> {
        match rate_limit {
            Some(limit) => {
                if self
                    .limiter
                    .as_ref()
                    .is_none_or(|limiter| limiter.limit() != limit)
                {
                    self.limiter = Some(FixedWindowLimiter::new(limit, now));
                }
                if let Some(limiter) = self.limiter.as_mut() {
                    limiter.try_acquire(now).map_err(Rejection::RateLimited)?;
                }
            }
            None => self.limiter = None,
        }

        self.breaker
            .try_acquire(now)
            .map_err(Rejection::CircuitOpen)
    }
}

enum Rejection {
    RateLimited(Duration),
    CircuitOpen(Duration),
}

pub struct OutboundGateway {
    client: reqwest::Client,
    default_timeout: Duration,
    breaker_policy: BreakerPolicy,
    retry: RetryPolicy,
    guards: Mutex<HashMap<Uuid, Arc<Mutex<ConnectorGuard>>>>,
}

impl fmt::Debug for OutboundGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundGateway")
            .field("default_timeout", &self.default_timeout)
            .field("breaker_policy", &self.breaker_policy)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn retry_after_secs(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

impl OutboundGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, HubError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("integration-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| HubError::Internal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            breaker_policy: BreakerPolicy {
                failure_threshold: config.failure_threshold.max(1),
                cooldown: Duration::from_secs(config.cooldown_seconds),
            },
            retry: RetryPolicy::from_config(config),
            guards: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self, connector_id: Uuid) -> Arc<Mutex<ConnectorGuard>> {
        let mut guards = lock(&self.guards);
        Arc::clone(
            guards
                .entry(connector_id)
                .or_insert_with(|| Arc::new(Mutex::new(ConnectorGuard::new(self.breaker_policy)))),
        )
    }

    /// Current breaker state of a connector; `Closed` if it was never called.
    pub fn circuit_state(&self, connector_id: Uuid) -> CircuitState {
        let guard = lock(&self.guards).get(&connector_id).cloned();
        guard.map_or(CircuitState::Closed, |guard| {
            lock(&guard).breaker.state(Instant::now())
        })
    }

    /// Health derived from breaker state. `Unknown` until the connector has
    /// been called through this gateway.
    pub fn connector_health(&self, connector_id: Uuid) -> HealthStatus {
        let Some(guard) = lock(&self.guards).get(&connector_id).cloned() else {
            return HealthStatus::Unknown;
        };
        let guard = lock(&guard);
        match guard.breaker.state(Instant::now()) {
            CircuitState::Open => HealthStatus::Unhealthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Closed if guard.breaker.consecutive_failures() > 0 => {
                HealthStatus::Degraded
            }
            CircuitState::Closed => HealthStatus::Healthy,
        }
    }

    /// Sends `request`, retrying transient failures of idempotent methods.
    ///
    /// Every error carries the elapsed time since the first admission check.
    pub async fn execute(&self, request: &GatewayRequest) -> Result<GatewayResponse, HubError> {
        let started = Instant::now();
        let connector_id = request.connector_id;
        let headers = request_headers(request)?;
        let guard = self.guard(connector_id);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let admitted = lock(&guard).admit(request.rate_limit, Instant::now());
            if let Err(rejection) = admitted {
                let err = match rejection {
                    Rejection::RateLimited(wait) => HubError::RateLimited {
                        connector_id,
                        retry_after_secs: retry_after_secs(wait),
                        duration_ms: elapsed_ms(started),
                    },
                    Rejection::CircuitOpen(wait) => HubError::CircuitOpen {
                        connector_id,
                        retry_after_secs: retry_after_secs(wait),
                        duration_ms: elapsed_ms(started),
                    },
                };
                warn!(connector_id = %connector_id, attempt, error = %err, "Outbound request rejected");
                record_outcome(&err, started);
                return Err(err);
            }

            match self.send_once(request, &headers, started, attempt).await {
                Ok(response) => {
                    lock(&guard).breaker.record_success();
                    counter!(GATEWAY_REQUESTS_TOTAL, "outcome" => "success").increment(1);
                    histogram!(GATEWAY_REQUEST_DURATION_MS).record(response.duration_ms as f64);
                    debug!(
                        connector_id = %connector_id,
                        status = response.status,
                        attempts = attempt,
                        duration_ms = response.duration_ms,
                        "Outbound request succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    if lock(&guard).breaker.record_failure(Instant::now()) {
                        counter!(GATEWAY_CIRCUIT_OPEN_TOTAL).increment(1);
                        warn!(connector_id = %connector_id, "Circuit opened for connector");
                    }

                    if self.retry.should_retry(&request.method, &err, attempt) {
                        let delay = self.retry.backoff(attempt);
                        info!(
                            connector_id = %connector_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying outbound request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!(
                        connector_id = %connector_id,
                        attempts = attempt,
                        duration_ms = elapsed_ms(started),
                        error = %err,
                        "Outbound request failed"
                    );
                    record_outcome(&err, started);
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(
        &self,
        request: &GatewayRequest,
        headers: &HeaderMap,
        started: Instant,
        attempt: u32,
    ) -> Result<GatewayResponse, HubError> {
        let connector_id = request.connector_id;
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers.clone());
        if let GatewayAuth::Basic { username, password } = &request.auth {
            builder = builder.basic_auth(username, Some(password));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        // the timeout covers both the send and reading the body
        let call = async {
            let response = builder.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };

        let timeout_error = || HubError::Timeout {
            connector_id,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            duration_ms: elapsed_ms(started),
        };

        let (status, bytes) = match tokio::time::timeout(timeout, call).await {
            Err(_) => return Err(timeout_error()),
            Ok(Err(err)) if err.is_timeout() => return Err(timeout_error()),
            Ok(Err(err)) => {
                return Err(HubError::gateway(
                    connector_id,
                    None,
                    Some(err.without_url().to_string()),
                    elapsed_ms(started),
                ));
            }
            Ok(Ok(result)) => result,
        };

        if !status.is_success() {
            return Err(HubError::gateway(
                connector_id,
                Some(status.as_u16()),
                Some(String::from_utf8_lossy(&bytes).into_owned()),
                elapsed_ms(started),
            ));
        }

        Ok(GatewayResponse {
            status: status.as_u16(),
            body: parse_body(&bytes),
            duration_ms: elapsed_ms(started),
            attempts: attempt,
        })
    }
}

/// Caller headers with the connector's credential replacing any value the
/// caller sent under the same name.
fn request_headers(request: &GatewayRequest) -> Result<HeaderMap, HubError> {
    let mut headers = request.headers.clone();
    match &request.auth {
        GatewayAuth::None => {}
        // reqwest appends the Basic value when the request is built
        GatewayAuth::Basic { .. } => {
            headers.remove(AUTHORIZATION);
        }
        GatewayAuth::ApiKey { header, value } => {
            let name = HeaderName::from_bytes(header.as_bytes())
                .map_err(|_| HubError::Validation(format!("invalid header name: {header}")))?;
            let mut value = HeaderValue::from_str(value).map_err(|_| {
                HubError::Validation("credential contains an invalid header value".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
    }
    Ok(headers)
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn record_outcome(err: &HubError, started: Instant) {
    let outcome = match err {
        HubError::RateLimited { .. } => "rate_limited",
        HubError::CircuitOpen { .. } => "circuit_open",
        HubError::Timeout { .. } => "timeout",
        _ => "error",
    };
    counter!(GATEWAY_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(GATEWAY_REQUEST_DURATION_MS).record(elapsed_ms(started) as f64);
}
