//! HTTP Range handling for the direct byte-range endpoint.
//!
//! Implements RFC 7233 semantics as the gateway promises them: a valid
//! `bytes=a-b` range yields exactly `b-a+1` body bytes with a matching
//! `Content-Range`; a range that touches anything at or past the file size
//! yields `416` with `Content-Range: bytes */size` and an empty body.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream;
use slipstream_core::{SessionId, SourceFile};
use tracing::debug;

use super::error_response;
use crate::server::AppState;

/// Chunk size streamed to the client per read.
const STREAM_CHUNK: usize = 256 * 1024;

/// Result of parsing a Range header against a known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedRange {
    /// No usable Range header; serve the whole file with 200
    Full,
    /// A valid inclusive byte range
    Satisfiable { start: u64, end: u64 },
    /// Syntactically a range, but outside the file; respond 416
    Unsatisfiable,
}

/// Parses an optional `Range` header value against the source size.
///
/// Headers that are not `bytes=` ranges, or whose numbers do not parse, are
/// treated as absent. A missing end defaults to `size - 1`.
pub fn parse_range(header: Option<&str>, size: u64) -> ParsedRange {
    let Some(raw) = header else {
        return ParsedRange::Full;
    };
    let Some(spec) = raw.strip_prefix("bytes=") else {
        return ParsedRange::Full;
    };
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return ParsedRange::Full;
    };

    let Ok(start) = start_str.trim().parse::<u64>() else {
        return ParsedRange::Full;
    };
    let end = if end_str.trim().is_empty() {
        size.saturating_sub(1)
    } else {
        match end_str.trim().parse::<u64>() {
            Ok(end) => end,
            Err(_) => return ParsedRange::Full,
        }
    };

    if start >= size || end >= size || start > end {
        return ParsedRange::Unsatisfiable;
    }
    ParsedRange::Satisfiable { start, end }
}

/// Streams `start..=end` of the source as a response body, chunk by chunk,
/// with socket backpressure deciding the pace.
fn source_body(source: Arc<dyn SourceFile>, start: u64, end: u64) -> Body {
    let stream = stream::unfold((source, start), move |(source, offset)| async move {
        if offset > end {
            return None;
        }
        let chunk = STREAM_CHUNK.min((end - offset + 1) as usize);
        match source.read_at(offset, chunk).await {
            Ok(bytes) => {
                let next = offset + bytes.len() as u64;
                Some((Ok::<Bytes, std::io::Error>(bytes), (source, next)))
            }
            Err(e) => {
                // Terminate the stream after surfacing the error
                Some((Err(std::io::Error::other(e.to_string())), (source, end + 1)))
            }
        }
    });
    Body::from_stream(stream)
}

/// `GET /stream/:id` - direct byte-range access to the session's source.
pub async fn stream_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let id = SessionId::from(id.as_str());
    let stream_source = match state.gateway.stream_source(&id).await {
        Ok(source) => source,
        Err(e) => return error_response(&e).into_response(),
    };

    let size = stream_source.source.len();
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header("X-Stream-Ready", if stream_source.ready { "true" } else { "false" })
        .header("X-Subtitle-Count", stream_source.subtitle_count.to_string());

    match parse_range(range_header, size) {
        ParsedRange::Unsatisfiable => {
            debug!(session = %id, range = ?range_header, size, "unsatisfiable range");
            response = response
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"));
            response
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        ParsedRange::Satisfiable { start, end } => {
            response = response
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .header(header::CONTENT_LENGTH, (end - start + 1).to_string());
            response
                .body(source_body(stream_source.source, start, end))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        ParsedRange::Full => {
            response = response
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size.to_string());
            let body = if size == 0 {
                Body::empty()
            } else {
                source_body(stream_source.source, 0, size - 1)
            };
            response
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}
