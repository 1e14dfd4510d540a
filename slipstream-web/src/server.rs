//! Router assembly and server lifecycle.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use slipstream_core::StreamGateway;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::handlers::{health, hls, range, seek, streams, subtitles};

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<StreamGateway>,
}

/// Builds the full route table over a gateway.
pub fn build_router(gateway: Arc<StreamGateway>) -> Router {
    let state = AppState { gateway };

    Router::new()
        .route("/stream", post(streams::create_stream))
        .route("/stream-yt", post(streams::create_url_stream))
        .route("/status/{id}", get(streams::stream_status))
        .route(
            "/stream/{id}",
            get(range::stream_source).delete(streams::teardown_stream),
        )
        .route("/hls/{id}/{*file}", get(hls::hls_file))
        .route("/seek/{id}", post(seek::seek))
        .route("/seek-info/{id}", get(seek::seek_info))
        .route("/subtitles-list/{id}", get(subtitles::subtitles_list))
        .route("/subtitles/{id}/{filename}", get(subtitles::subtitle_file))
        .route("/health", get(health::health))
        .route("/resources", get(health::resources))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Waits for SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Binds the listener and serves until a shutdown signal arrives, then
/// drains in-flight responses and closes every session.
///
/// # Errors
///
/// Returns an error when the port cannot be bound; the caller exits
/// non-zero in that case.
pub async fn run_server(gateway: Arc<StreamGateway>) -> Result<(), std::io::Error> {
    let port = gateway.port();
    let app = build_router(Arc::clone(&gateway));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("slipstream gateway listening on http://0.0.0.0:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.shutdown().await;
    Ok(())
}
