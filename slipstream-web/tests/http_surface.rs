//! HTTP surface tests driving the router in-process over simulated
//! collaborators.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use slipstream_core::{SimulatedTorrentClient, TorrentClient};
use slipstream_core::config::SlipstreamConfig;
use slipstream_core::gateway::{GatewayDeps, StreamGateway};
use slipstream_core::transcode::ffmpeg::{ProbeReport, SimulationTranscoder, StaticProber};
use slipstream_web::build_router;
use tower::ServiceExt;

struct Surface {
    _dir: tempfile::TempDir,
    router: Router,
    client: Arc<SimulatedTorrentClient>,
}

fn surface() -> Surface {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("sessions");
    std::fs::create_dir_all(&root).unwrap();

    let client = Arc::new(SimulatedTorrentClient::new());
    let gateway = StreamGateway::new(
        SlipstreamConfig::for_testing(root),
        GatewayDeps {
            torrent_client: Arc::clone(&client) as Arc<dyn TorrentClient>,
            // 100 short segments so seek scenarios have room to move
            transcoder: Arc::new(SimulationTranscoder::new().with_segments(100, 64)),
            prober: Arc::new(StaticProber(ProbeReport::default())),
        },
    );

    Surface {
        _dir: dir,
        router: build_router(gateway),
        client,
    }
}

async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::post(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn create_ready_stream(surface: &Surface, info_hash: &str, size: usize) -> String {
    let media = surface._dir.path().join(format!("{info_hash}.mp4"));
    std::fs::write(&media, vec![0u8; size]).unwrap();
    surface.client.register_file(info_hash, media).await.unwrap();

    let (status, body) = post_json(
        &surface.router,
        "/stream",
        serde_json::json!({"magnet": format!("magnet:?xt=urn:btih:{info_hash}")}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["stream_id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 8);
    assert_eq!(body["hls_url"], format!("/hls/{id}/playlist.m3u8"));
    assert_eq!(body["mp4_url"], format!("/stream/{id}"));

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let (status, snapshot) = get(&surface.router, &format!("/status/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        if snapshot["ready"] == true {
            assert!(snapshot["seekControl"]["totalSegments"].as_u64().unwrap() >= 1);
            return id;
        }
        assert!(snapshot["error"].is_null(), "failed: {snapshot}");
        assert!(Instant::now() < deadline, "never became ready");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn happy_path_serves_playlist() {
    let surface = surface();
    let id = create_ready_stream(&surface, "aa11bb22", 4096).await;

    let response = surface
        .router
        .clone()
        .oneshot(
            Request::get(format!("/hls/{id}/playlist.m3u8"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.starts_with(b"#EXTM3U"));
}

#[tokio::test]
async fn missing_magnet_is_bad_request() {
    let surface = surface();
    let (status, body) = post_json(&surface.router, "/stream", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BadRequest");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let surface = surface();
    let (status, _) = get(&surface.router, "/status/deadbeef").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn seek_by_time_matches_segment_math() {
    let surface = surface();
    let id = create_ready_stream(&surface, "bb22cc33", 4096).await;

    let (status, body) = post_json(
        &surface.router,
        &format!("/seek/{id}"),
        serde_json::json!({"time": 17}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["currentSegment"], 4);
    assert_eq!(body["playbackPosition"], 16);
    assert_eq!(body["playbackPositionFormatted"], "00:00:16");

    // Same payload twice: identical outcome
    let (_, second) = post_json(
        &surface.router,
        &format!("/seek/{id}"),
        serde_json::json!({"time": 17}),
    )
    .await;
    assert_eq!(second["currentSegment"], 4);
    assert_eq!(second["playbackPosition"], 16);
}

#[tokio::test]
async fn seek_out_of_range_reports_valid_range() {
    let surface = surface();
    let id = create_ready_stream(&surface, "cc33dd44", 4096).await;

    let (status, body) = post_json(
        &surface.router,
        &format!("/seek/{id}"),
        serde_json::json!({"segment": 999}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid segment 999, valid range: 0-99");
}

#[tokio::test]
async fn seek_without_target_is_bad_request() {
    let surface = surface();
    let id = create_ready_stream(&surface, "dd44ee55", 4096).await;

    let (status, _) = post_json(&surface.router, &format!("/seek/{id}"), serde_json::json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn range_request_semantics() {
    let surface = surface();
    let id = create_ready_stream(&surface, "ee55ff66", 1000).await;

    // Range beyond size: 416 with the star form
    let response = surface
        .router
        .clone()
        .oneshot(
            Request::get(format!("/stream/{id}"))
                .header(header::RANGE, "bytes=1000-1500")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());

    // Valid range: exact body length and Content-Range
    let response = surface
        .router
        .clone()
        .oneshot(
            Request::get(format!("/stream/{id}"))
                .header(header::RANGE, "bytes=100-199")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 100-199/1000");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()["X-Stream-Ready"], "true");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 100);

    // Single byte at the start
    let response = surface
        .router
        .clone()
        .oneshot(
            Request::get(format!("/stream/{id}"))
                .header(header::RANGE, "bytes=0-0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 1);

    // No Range header: full body with 200
    let response = surface
        .router
        .clone()
        .oneshot(
            Request::get(format!("/stream/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 1000);
}

#[tokio::test]
async fn subtitles_list_reports_supported_languages() {
    let surface = surface();
    let id = create_ready_stream(&surface, "ff66aa77", 4096).await;

    let (status, body) = get(&surface.router, &format!("/subtitles-list/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["available"].as_array().unwrap().is_empty());
    let supported = body["languageSupported"].as_array().unwrap();
    assert!(supported.iter().any(|v| v == "eng"));
    assert!(supported.iter().any(|v| v == "tha"));
}

#[tokio::test]
async fn health_and_resources_respond() {
    let surface = surface();

    let (status, body) = get(&surface.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ffmpeg"], true);
    assert!(body["activeStreams"].is_u64());
    assert!(body["features"].as_array().unwrap().iter().any(|f| f == "hls"));

    let (status, body) = get(&surface.router, "/resources").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["limits"]["memoryMb"].as_u64().unwrap() >= 1);
    assert!(body["plan"]["maxConcurrent"].as_u64().unwrap() >= 1);
    assert!(body["scheduler"]["queued"].is_u64());
}

#[tokio::test]
async fn teardown_then_hls_serves_404() {
    let surface = surface();
    let id = create_ready_stream(&surface, "abcd9876", 4096).await;

    let response = surface
        .router
        .clone()
        .oneshot(
            Request::delete(format!("/stream/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = surface
        .router
        .clone()
        .oneshot(
            Request::get(format!("/hls/{id}/playlist.m3u8"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
