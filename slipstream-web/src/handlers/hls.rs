//! Static serving of playlists and segments from session folders.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use slipstream_core::SessionId;

use super::error_response;
use crate::server::AppState;

/// Content type for a file inside a session folder.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("vtt") => "text/vtt",
        _ => "application/octet-stream",
    }
}

/// `GET /hls/:id/*path` - playlist or segment bytes.
///
/// HLS clients tolerate 404 on segments that retention already evicted;
/// they move on to the next playlist refresh.
pub async fn hls_file(
    State(state): State<AppState>,
    Path((id, file)): Path<(String, String)>,
) -> Response {
    let id = SessionId::from(id.as_str());
    let path = match state.gateway.session_file_path(&id, &file).await {
        Ok(path) => path,
        Err(e) => return error_response(&e).into_response(),
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type_for(&file)),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
