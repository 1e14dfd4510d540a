//! HTTP request handlers organized by functionality.

pub mod health;
pub mod hls;
pub mod range;
pub mod seek;
pub mod streams;
pub mod subtitles;

use axum::Json;
use axum::http::StatusCode;
use serde_json::json;
use slipstream_core::SessionError;

/// Maps a session error onto its HTTP status and JSON error body.
pub fn error_response(error: &SessionError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match error {
        SessionError::BadRequest(_) | SessionError::OutOfRange(_) => StatusCode::BAD_REQUEST,
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::AccessDenied(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "error": error.message(),
            "kind": error.kind(),
        })),
    )
}
