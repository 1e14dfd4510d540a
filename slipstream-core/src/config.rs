//! Centralized configuration for Slipstream.
//!
//! All tunable parameters live here, grouped into logical sections, with
//! environment variable overrides for runtime customization.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Slipstream components.
#[derive(Debug, Clone, Default)]
pub struct SlipstreamConfig {
    pub server: ServerConfig,
    pub segments: SegmentConfig,
    pub storage: StorageConfig,
    pub resources: ResourceConfig,
    pub tools: ToolsConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the HTTP listener binds to
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// HLS segment tuning parameters.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Shortest segment duration the tuner may pick
    pub min_duration_secs: u32,
    /// Longest segment duration the tuner may pick
    pub max_duration_secs: u32,
    /// Active sessions per segment-duration step
    pub target_streams_per_step: u32,
    /// Cadence of the per-session segment count monitor
    pub monitor_interval: Duration,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 4,
            max_duration_secs: 10,
            target_streams_per_step: 10,
            monitor_interval: Duration::from_millis(5000),
        }
    }
}

/// Per-session disk budget and layout.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory under which session folders are created
    pub session_root: PathBuf,
    /// Rolling-window byte budget per session folder
    pub max_session_bytes: u64,
    /// Newest segments protected from retention deletion
    pub keep_segments: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_root: PathBuf::from("/tmp"),
            max_session_bytes: 2_000_000_000,
            keep_segments: 5,
        }
    }
}

/// Resource probing and transcoder concurrency limits.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Cadence of the cgroup/OS resource re-probe
    pub watch_interval: Duration,
    /// Explicit transcoder concurrency cap; wins over the computed value
    pub max_concurrent_override: Option<usize>,
    /// Explicit threads-per-transcoder; wins over the computed value
    pub threads_override: Option<usize>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            watch_interval: Duration::from_millis(15_000),
            max_concurrent_override: None,
            threads_override: None,
        }
    }
}

/// Paths of the external tool binaries.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Transcoder binary
    pub ffmpeg_path: PathBuf,
    /// Media prober binary
    pub ffprobe_path: PathBuf,
    /// URL downloader binary
    pub downloader_path: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            downloader_path: PathBuf::from("yt-dlp"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl SlipstreamConfig {
    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("PORT") {
            config.server.port = port;
        }

        if let Some(secs) = env_parse::<u32>("MIN_SEGMENT_SECONDS") {
            config.segments.min_duration_secs = secs.max(1);
        }
        if let Some(secs) = env_parse::<u32>("MAX_SEGMENT_SECONDS") {
            config.segments.max_duration_secs = secs.max(1);
        }
        if let Some(target) = env_parse::<u32>("TARGET_STREAMS_PER_SEGMENT") {
            config.segments.target_streams_per_step = target.max(1);
        }
        if let Some(ms) = env_parse::<u64>("SEGMENT_MONITOR_INTERVAL_MS") {
            config.segments.monitor_interval = Duration::from_millis(ms);
        }

        if let Some(bytes) = env_parse::<u64>("MAX_STREAM_STORAGE_BYTES") {
            config.storage.max_session_bytes = bytes;
        }
        if let Some(keep) = env_parse::<usize>("KEEP_SEGMENTS") {
            config.storage.keep_segments = keep;
        }
        if let Ok(root) = std::env::var("STREAM_SESSION_ROOT") {
            config.storage.session_root = PathBuf::from(root);
        }

        if let Some(ms) = env_parse::<u64>("RESOURCE_WATCH_INTERVAL_MS") {
            config.resources.watch_interval = Duration::from_millis(ms);
        }
        config.resources.max_concurrent_override = env_parse::<usize>("MAX_CONCURRENT_FFMPEG");
        config.resources.threads_override = env_parse::<usize>("FFMPEG_THREADS");

        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            config.tools.ffmpeg_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("FFPROBE_PATH") {
            config.tools.ffprobe_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DOWNLOADER_PATH") {
            config.tools.downloader_path = PathBuf::from(path);
        }

        config
    }

    /// Configuration suitable for tests: short timers, small budgets.
    pub fn for_testing(session_root: PathBuf) -> Self {
        Self {
            storage: StorageConfig {
                session_root,
                max_session_bytes: 10_000_000,
                keep_segments: 3,
            },
            segments: SegmentConfig {
                monitor_interval: Duration::from_millis(50),
                ..Default::default()
            },
            resources: ResourceConfig {
                watch_interval: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
