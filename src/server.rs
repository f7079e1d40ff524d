//! # Server Configuration
//!
//! Router assembly, shared state and the HTTP server loop for the Integration Hub API.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::cache::{CacheStore, PullCache};
use crate::config::AppConfig;
use crate::crypto::KeyRing;
use crate::error::HubError;
use crate::gateway::OutboundGateway;
use crate::handlers;
use crate::orchestrator::{PullOrchestrator, PushOrchestrator};
use crate::repositories::{
    ConnectorDirectory, ConnectorRepository, CredentialRepository, FieldMappingRepository,
    FieldMappingStore,
};
use crate::telemetry::{TraceContext, with_trace_context};
use crate::vault::{CredentialSource, CredentialVault};

/// Request and response header carrying the correlation id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub connectors: ConnectorRepository,
    pub cache: PullCache,
    pub gateway: Arc<OutboundGateway>,
    pub pull: PullOrchestrator,
    pub push: PushOrchestrator,
}

impl AppState {
    /// Wire repositories, vault, cache and gateway into both orchestrators.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        keys: Arc<KeyRing>,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, HubError> {
        let shared_db = Arc::new(db.clone());
        let connectors = ConnectorRepository::new(Arc::clone(&shared_db));
        let vault = CredentialVault::new(CredentialRepository::new(Arc::clone(&shared_db)), keys);
        let cache = PullCache::from_config(store, &config.cache);
        let gateway = Arc::new(OutboundGateway::new(&config.gateway)?);

        let directory: Arc<dyn ConnectorDirectory> = Arc::new(connectors.clone());
        let mappings: Arc<dyn FieldMappingStore> =
            Arc::new(FieldMappingRepository::new(shared_db));
        let credentials: Arc<dyn CredentialSource> = Arc::new(vault);

        let pull = PullOrchestrator::new(
            Arc::clone(&directory),
            Arc::clone(&mappings),
            Arc::clone(&credentials),
            cache.clone(),
            Arc::clone(&gateway),
        );
        let push = PushOrchestrator::new(directory, mappings, credentials, Arc::clone(&gateway));

        Ok(Self {
            config,
            db,
            connectors,
            cache,
            gateway,
            pull,
            push,
        })
    }
}

/// Scope each request in a trace context and echo its id back.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext::from_header(
        request
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let trace_id = context.trace_id.clone();
    request.extensions_mut().insert(context.clone());

    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/integrations/pull", post(handlers::integration::pull))
        .route("/integrations/push", post(handlers::integration::push))
        .route("/cache/stats", get(handlers::integration::cache_stats))
        .route("/cache", delete(handlers::integration::clear_cache))
        .route(
            "/connectors/{id}/health",
            get(handlers::integration::connector_health),
        )
        .route(
            "/transforms/preview",
            post(handlers::transforms::preview_transforms),
        )
        .route(
            "/transforms/validate",
            post(handlers::transforms::validate_transform_chain),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serves the API until `shutdown` is cancelled
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    keys: Arc<KeyRing>,
    store: Arc<dyn CacheStore>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let profile = config.profile.clone();

    let state = AppState::new(Arc::new(config), db, keys, store)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::integration::pull,
        crate::handlers::integration::push,
        crate::handlers::integration::cache_stats,
        crate::handlers::integration::clear_cache,
        crate::handlers::integration::connector_health,
        crate::handlers::transforms::preview_transforms,
        crate::handlers::transforms::validate_transform_chain,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::integration::PullBody,
            crate::handlers::integration::PushBody,
            crate::handlers::integration::CacheClearResponse,
            crate::handlers::integration::ConnectorHealthResponse,
            crate::handlers::transforms::PreviewTransformsBody,
            crate::handlers::transforms::ValidateTransformsBody,
            crate::handlers::transforms::ValidateTransformsResponse,
            crate::orchestrator::PullResult,
            crate::orchestrator::PullMetadata,
            crate::orchestrator::PushResult,
            crate::orchestrator::PushEndpoint,
            crate::orchestrator::PushMethod,
            crate::cache::CacheStats,
            crate::gateway::CircuitState,
            crate::models::connector::HealthStatus,
            crate::transforms::TransformSpec,
            crate::transforms::TransformExecution,
            crate::transforms::TransformStep,
            crate::error::ApiError,
            crate::error::UpstreamErrorDetails,
            crate::auth::OrganizationHeader,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Integration Hub API",
        description = "Pull and push execution against organization ERP/CRM connectors",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
