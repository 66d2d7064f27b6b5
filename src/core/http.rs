//! Health and metrics endpoints of the worker, served with Axum

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::metrics::Metrics;
use crate::store::{ListingSource, ResultStore};

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
    pub listings: Arc<dyn ListingSource>,
    pub results: Arc<dyn ResultStore>,
}

impl AppState {
    pub fn new(
        metrics: Arc<Metrics>,
        listings: Arc<dyn ListingSource>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            metrics,
            start_time: Arc::new(Instant::now()),
            listings,
            results,
        }
    }
}

/// Liveness of the listings database and the result cache.
///
/// Answers 503 when either backend is unreachable.
pub async fn health_check(State(state): State<AppState>) -> Response {
    let database = state.listings.ping().await;
    let cache = state.results.ping().await;

    state
        .metrics
        .database_connected
        .set(if database.is_ok() { 1.0 } else { 0.0 });
    state
        .metrics
        .cache_connected
        .set(if cache.is_ok() { 1.0 } else { 0.0 });

    let healthy = database.is_ok() && cache.is_ok();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let describe = |r: &Result<(), crate::error::StoreError>| match r {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "database": describe(&database),
            "cache": describe(&cache),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "service": "estate-analytics-worker"
        })),
    )
        .into_response()
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();
    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();
    state.metrics.http_requests_in_flight.dec();

    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    info!(
        "Metrics endpoint available at http://0.0.0.0:{}/metrics",
        port
    );
    axum::serve(listener, app).await?;

    Ok(())
}
