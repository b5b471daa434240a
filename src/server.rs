//! Web server module for the exporter.
//!
//! Serves the Prometheus text exposition and a liveness probe.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::observer::Scrape;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scraper: Arc<dyn Scrape>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

/// Create the Axum router with all routes.
///
/// `metrics_path` must start with `/`; configuration validation enforces it.
pub fn create_router(state: AppState, metrics_path: &str) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Run one collection cycle and render it.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let sink = state.scraper.scrape().await;

    match sink.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
    }
}
