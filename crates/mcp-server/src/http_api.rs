//! Read-only management HTTP server (spec.md §6 "Operator-facing management
//! surface"), bound to its own `management_host`/`management_port`, always
//! independent of the MCP transport.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::state::BackgroundState;

pub fn router(state: Arc<BackgroundState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/version", get(version))
        .route("/settings", get(settings))
        .route("/state", get(debug_state))
        .with_state(state)
}

async fn health(State(state): State<Arc<BackgroundState>>) -> impl IntoResponse {
    Json(state.health_snapshot().await)
}

async fn status(State(state): State<Arc<BackgroundState>>) -> impl IntoResponse {
    Json(state.status_snapshot().await)
}

async fn metrics(State(state): State<Arc<BackgroundState>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics_text(),
    )
        .into_response()
}

async fn version() -> impl IntoResponse {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn settings(State(state): State<Arc<BackgroundState>>) -> impl IntoResponse {
    Json(state.settings_snapshot().await)
}

async fn debug_state(State(state): State<Arc<BackgroundState>>) -> impl IntoResponse {
    Json(state.state_snapshot().await)
}
