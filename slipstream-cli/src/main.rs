//! Slipstream command-line interface.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use slipstream_core::config::SlipstreamConfig;
use slipstream_core::gateway::{GatewayDeps, StreamGateway};
use slipstream_core::{FfprobeProber, ProductionTranscoder, SimulatedTorrentClient};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

#[derive(Parser)]
#[command(name = "slipstream")]
#[command(about = "Streaming gateway: torrent and URL sources to HTTP-playable HLS")]
struct Cli {
    /// Console log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Append debug-level logs to this file, so a failed transcoder run can
    /// be reconstructed without re-running at a noisier console level
    #[arg(long)]
    debug_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Local media files registered as simulated torrents; each file's
        /// synthetic info hash is logged at startup. A linked torrent
        /// engine replaces this in embedding deployments.
        #[arg(long)]
        seed: Vec<PathBuf>,
    },
}

/// Console logging at the chosen level (`RUST_LOG` wins when set), plus an
/// optional debug file capturing the slipstream crates in full.
fn init_tracing(level: tracing::Level, debug_log: Option<&Path>) -> std::io::Result<()> {
    let console = fmt::layer().compact().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())),
    );

    match debug_log {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(EnvFilter::new(
                    "slipstream_core=debug,slipstream_web=debug,info",
                ));
            tracing_subscriber::registry()
                .with(console)
                .with(file_layer)
                .init();
        }
        None => tracing_subscriber::registry().with(console).init(),
    }
    Ok(())
}

/// Synthetic info hash for a seeded file, derived from its name so magnets
/// stay stable across restarts.
fn seed_hash(path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("seed");
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level, cli.debug_log.as_deref()) {
        eprintln!("failed to initialize logging: {e}");
        return std::process::ExitCode::FAILURE;
    }

    let config = SlipstreamConfig::from_env();

    match cli.command {
        Commands::Serve { seed } => {
            let client = Arc::new(SimulatedTorrentClient::new());
            for path in &seed {
                let hash = seed_hash(path);
                match client.register_file(&hash, path.clone()).await {
                    Ok(()) => tracing::info!(
                        file = %path.display(),
                        magnet = %format!("magnet:?xt=urn:btih:{hash}"),
                        "seeded local file"
                    ),
                    Err(e) => tracing::warn!(file = %path.display(), error = %e, "seed skipped"),
                }
            }

            let gateway = StreamGateway::new(
                config.clone(),
                GatewayDeps {
                    torrent_client: client,
                    transcoder: Arc::new(ProductionTranscoder::new(
                        config.tools.ffmpeg_path.clone(),
                    )),
                    prober: Arc::new(FfprobeProber::new(config.tools.ffprobe_path.clone())),
                },
            );

            if let Err(e) = slipstream_web::run_server(gateway).await {
                tracing::error!(error = %e, "server failed to start");
                return std::process::ExitCode::FAILURE;
            }
            std::process::ExitCode::SUCCESS
        }
    }
}
