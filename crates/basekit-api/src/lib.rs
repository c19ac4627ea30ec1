//! # Basekit HTTP Service
//!
//! Request dispatcher for basekit services.
//!
//! This crate provides:
//! - The healthcheck endpoint (`GET /ping`)
//! - Static API documentation under `/swagger`
//! - Fixed plain-text 404 and 405 responses
//! - Request logging with correlation ID propagation
//!
//! Handlers are resolved from a [`Container`] once at startup; the router
//! itself holds no global state.

pub mod docs;
pub mod errors;
pub mod responses;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;


use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router, ServiceExt,
};
use basekit_core::{Container, HealthStatus, HealthcheckService, ResolveError};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::{Layer, ServiceBuilder};
use tower_http::{
    normalize_path::{NormalizePath, NormalizePathLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, instrument, warn};

pub use errors::{ApiError, ServeError};
pub use responses::{ErrorResponse, METHOD_NOT_ALLOWED, ROUTE_NOT_FOUND};

/// Header carrying the per-request correlation ID.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// The routed application with trailing-slash normalization applied.
pub type App = NormalizePath<Router>;

// ============================================================================
// Controllers
// ============================================================================

/// HTTP-facing half of the healthcheck.
#[derive(Clone)]
pub struct HealthcheckController {
    service: Arc<dyn HealthcheckService>,
}

impl HealthcheckController {
    pub fn new(service: Arc<dyn HealthcheckService>) -> Self {
        Self { service }
    }

    pub async fn ping(&self) -> Result<HealthStatus, ApiError> {
        Ok(self.service.check().await?)
    }
}

/// Register the controllers this crate serves.
///
/// Requires `Arc<dyn HealthcheckService>` to be resolvable from `container`.
pub fn provide_controllers(container: &Container) {
    container.provide::<HealthcheckController, (Arc<dyn HealthcheckService>,), _, _>(
        |(service,), _registrar| async move { Ok(HealthcheckController::new(service)) },
    );
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub healthcheck: HealthcheckController,
}

impl AppState {
    pub fn new(healthcheck: HealthcheckController) -> Self {
        Self { healthcheck }
    }

    /// Resolve every handler from the registry.
    pub async fn from_container(container: &Container) -> Result<Self, ResolveError> {
        Ok(Self::new(container.resolve::<HealthcheckController>().await?))
    }
}

/// Correlation ID attached to each request's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the routing table.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let docs_routes = Router::new()
        .route("/swagger", get(docs::swagger_index))
        .route("/swagger/{*asset}", get(docs::swagger_asset));

    Router::new()
        .route("/ping", get(handle_ping))
        .merge(docs_routes)
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(TimeoutLayer::new(request_timeout))
                .into_inner(),
        )
        .with_state(state)
}

/// Router wrapped so that `/ping/` routes like `/ping`.
pub fn create_app(state: AppState, request_timeout: Duration) -> App {
    NormalizePathLayer::trim_trailing_slash().layer(create_router(state, request_timeout))
}

/// Bind the listener for `address` (`host:port`).
pub async fn bind(address: &str) -> Result<TcpListener, ServeError> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ServeError::BindFailed {
            address: address.to_string(),
            message: e.to_string(),
        })
}

/// Serve `app` until `shutdown` resolves, then finish in-flight requests.
pub async fn serve<S>(listener: TcpListener, app: App, shutdown: S) -> Result<(), ServeError>
where
    S: Future<Output = ()> + Send + 'static,
{
    if let Ok(address) = listener.local_addr() {
        info!(address = %address, "Starting HTTP server");
    }

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServeError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server stopped");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_ping(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    let status = state.healthcheck.ping().await?;
    Ok(Json(status))
}

async fn route_not_found() -> Response {
    plain_text(StatusCode::NOT_FOUND, ROUTE_NOT_FOUND)
}

async fn method_not_allowed() -> Response {
    plain_text(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED)
}

fn plain_text(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Reuses an inbound `x-correlation-id` or generates one, records it on the
/// span, exposes it to handlers as [`CorrelationId`] and echoes it on the
/// response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(mut request: Request, next: middleware::Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}
