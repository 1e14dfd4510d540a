//! Advisory seek handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use slipstream_core::SessionId;
use slipstream_core::output::seek::SeekRequest;

use super::error_response;
use crate::server::AppState;

/// `POST /seek/:id` - move the shared cursor by `{time}` or `{segment}`.
pub async fn seek(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SeekRequest>,
) -> Response {
    let id = SessionId::from(id.as_str());
    match state.gateway.seek(&id, &request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// `GET /seek-info/:id` - cursor position plus a window of segment
/// descriptors annotated with on-disk availability.
pub async fn seek_info(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = SessionId::from(id.as_str());
    match state.gateway.seek_info(&id).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
