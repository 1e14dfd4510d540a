//! Subtitle listing and file serving.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use slipstream_core::SessionId;

use super::error_response;
use crate::server::AppState;

/// `GET /subtitles-list/:id` - detected and extracted subtitle tracks.
pub async fn subtitles_list(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = SessionId::from(id.as_str());
    match state.gateway.subtitles_list(&id).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// `GET /subtitles/:id/:filename` - subtitle file bytes.
pub async fn subtitle_file(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> Response {
    let id = SessionId::from(id.as_str());
    let path = match state.gateway.session_file_path(&id, &filename).await {
        Ok(path) => path,
        Err(e) => return error_response(&e).into_response(),
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
