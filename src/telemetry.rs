//! Telemetry: global subscriber setup, request-scoped trace context, and the
//! metric names emitted by the integration engine.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

pub const GATEWAY_REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const GATEWAY_REQUEST_DURATION_MS: &str = "gateway_request_duration_ms";
pub const GATEWAY_CIRCUIT_OPEN_TOTAL: &str = "gateway_circuit_open_total";
pub const PULL_CACHE_HITS_TOTAL: &str = "pull_cache_hits_total";
pub const PULL_CACHE_MISSES_TOTAL: &str = "pull_cache_misses_total";
pub const PUSH_REQUESTS_TOTAL: &str = "push_requests_total";

/// Trace context containing request correlation ID.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Use the caller-supplied id when present, otherwise mint one.
    pub fn from_header(value: Option<&str>) -> Self {
        let trace_id = value
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        Self { trace_id }
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize global tracing/logging exactly once, wiring `log::` macros into the tracing pipeline.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // Another component may already have registered the bridge
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: Failed to install log tracer bridge: {}. `log::` macros will not emit structured tracing events.",
                err
            );
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: Failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
    }

    describe_metrics();

    Ok(())
}

/// Register descriptions for the engine's metrics with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        GATEWAY_REQUESTS_TOTAL,
        "Outbound gateway calls by outcome (success, rate_limited, circuit_open, timeout, http_error, transport_error)"
    );
    describe_histogram!(
        GATEWAY_REQUEST_DURATION_MS,
        Unit::Milliseconds,
        "Wall-clock duration of outbound gateway calls including retries"
    );
    describe_counter!(
        GATEWAY_CIRCUIT_OPEN_TOTAL,
        "Transitions of a connector circuit breaker into the open state"
    );
    describe_counter!(PULL_CACHE_HITS_TOTAL, "Pull requests served from the cache");
    describe_counter!(
        PULL_CACHE_MISSES_TOTAL,
        "Pull requests that required an upstream fetch"
    );
    describe_counter!(PUSH_REQUESTS_TOTAL, "Push requests by outcome");
}

/// Execute `future` within the provided trace context, making it available through task-local
/// storage for the duration of the request.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Get the currently active trace ID, if one has been set for the running task.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trace_context_scoped_to_future() {
        assert!(current_trace_id().is_none());

        let observed = with_trace_context(
            TraceContext {
                trace_id: "abc123".to_string(),
            },
            async { current_trace_id() },
        )
        .await;

        assert_eq!(observed.as_deref(), Some("abc123"));
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn test_trace_context_from_header() {
        assert_eq!(TraceContext::from_header(Some(" req-1 ")).trace_id, "req-1");

        let generated = TraceContext::from_header(None);
        assert_eq!(generated.trace_id.len(), 32);

        let oversized = "x".repeat(200);
        assert_ne!(
            TraceContext::from_header(Some(&oversized)).trace_id,
            oversized
        );
    }
}
