//! Stream creation, status and teardown handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use slipstream_core::{SessionError, SessionId};

use super::error_response;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct CreateStreamRequest {
    pub magnet: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUrlStreamRequest {
    pub url: Option<String>,
}

fn created_response(id: &SessionId) -> Json<serde_json::Value> {
    Json(json!({
        "stream_id": id,
        "hls_url": format!("/hls/{id}/playlist.m3u8"),
        "mp4_url": format!("/stream/{id}"),
        "status_url": format!("/status/{id}"),
    }))
}

/// `POST /stream` - submit a magnet URI.
pub async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<CreateStreamRequest>,
) -> Response {
    let Some(magnet) = request.magnet.filter(|m| !m.is_empty()) else {
        return error_response(&SessionError::BadRequest("magnet is required".into()))
            .into_response();
    };

    match state.gateway.create_torrent_session(&magnet).await {
        Ok(id) => created_response(&id).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// `POST /stream-yt` - submit a remote URL for the downloader.
pub async fn create_url_stream(
    State(state): State<AppState>,
    Json(request): Json<CreateUrlStreamRequest>,
) -> Response {
    let Some(url) = request.url.filter(|u| !u.is_empty()) else {
        return error_response(&SessionError::BadRequest("url is required".into()))
            .into_response();
    };

    match state.gateway.create_url_session(&url).await {
        Ok(id) => created_response(&id).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// `GET /status/:id` - point-in-time session snapshot.
pub async fn stream_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = SessionId::from(id.as_str());
    match state.gateway.status(&id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// `DELETE /stream/:id` - client-initiated teardown.
pub async fn teardown_stream(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = SessionId::from(id.as_str());
    match state.gateway.close_session(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
