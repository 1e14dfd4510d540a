//! Health and resource reporting.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};

use crate::server::AppState;

/// `GET /health` - tool availability, uptime and active stream count.
pub async fn health(State(state): State<AppState>) -> Response {
    Json(state.gateway.health().await).into_response()
}

/// `GET /resources` - detected limits, tuning plan and scheduler stats.
pub async fn resources(State(state): State<AppState>) -> Response {
    Json(state.gateway.resources().await).into_response()
}
