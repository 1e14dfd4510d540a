//! Slipstream Core - stream session management
//!
//! This crate provides the building blocks of the streaming gateway: resource
//! probing and tuning, the session registry and lifecycle, torrent/URL source
//! adapters, the bounded transcoder scheduler and the output supervisor that
//! watches playlists, enforces the disk budget and answers seek queries.

pub mod config;
pub mod gateway;
pub mod output;
pub mod resources;
pub mod session;
pub mod source;
pub mod transcode;

// Re-export main types for convenient access
pub use config::SlipstreamConfig;
pub use gateway::{GatewayDeps, HealthReport, ResourceReport, StreamGateway};
pub use session::{Session, SessionId, SessionRegistry, SessionState, SourceKind};
pub use source::torrent::{SimulatedTorrentClient, TorrentClient, TorrentHandle};
pub use source::{SourceError, SourceFile};
pub use transcode::ffmpeg::{
    FfprobeProber, MediaProber, ProductionTranscoder, SimulationTranscoder, Transcoder,
};
pub use transcode::scheduler::TranscodeScheduler;

/// Errors a stream session can accumulate or an operation can fail with.
///
/// Session-scoped errors are recorded on the session record and rendered as
/// `<kind>: <message>`; the HTTP layer translates them into status codes.
/// The enum is cloneable so a terminal error can live on the record while
/// copies surface through status snapshots.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Missing or malformed client input
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown session id
    #[error("session not found: {0}")]
    NotFound(String),

    /// Session folder could not be created, read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// Source contains no file with a playable extension
    #[error("no playable file in source")]
    NoPlayableFile,

    /// Transcoder or prober binary not found on PATH
    #[error("external tool missing: {0}")]
    ToolMissing(String),

    /// Transcoder or downloader exited non-zero
    #[error("external tool failed: {0}")]
    ToolFailed(String),

    /// Runtime error reported by the transcoder subprocess
    #[error("transcoder error: {0}")]
    Transcoder(String),

    /// Torrent engine error
    #[error("torrent error: {0}")]
    Torrent(String),

    /// Seek beyond the known segment range
    #[error("seek out of range: {0}")]
    OutOfRange(String),

    /// Resolved path escapes the session folder
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A state change that the session lifecycle does not allow
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the session was in
        from: SessionState,
        /// State the caller asked for
        to: SessionState,
    },
}

impl SessionError {
    /// The bare message without the kind prefix, for HTTP error bodies.
    pub fn message(&self) -> String {
        match self {
            SessionError::BadRequest(m)
            | SessionError::NotFound(m)
            | SessionError::Storage(m)
            | SessionError::ToolMissing(m)
            | SessionError::ToolFailed(m)
            | SessionError::Transcoder(m)
            | SessionError::Torrent(m)
            | SessionError::OutOfRange(m)
            | SessionError::AccessDenied(m) => m.clone(),
            SessionError::NoPlayableFile | SessionError::InvalidTransition { .. } => {
                self.to_string()
            }
        }
    }

    /// Short machine-readable kind, used in error payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::BadRequest(_) => "BadRequest",
            SessionError::NotFound(_) => "NotFound",
            SessionError::Storage(_) => "StorageError",
            SessionError::NoPlayableFile => "NoPlayableFile",
            SessionError::ToolMissing(_) => "ExternalToolMissing",
            SessionError::ToolFailed(_) => "ExternalToolFailed",
            SessionError::Transcoder(_) => "TranscoderError",
            SessionError::Torrent(_) => "TorrentError",
            SessionError::OutOfRange(_) => "OutOfRange",
            SessionError::AccessDenied(_) => "AccessDenied",
            SessionError::InvalidTransition { .. } => "InvalidTransition",
        }
    }
}

/// Convenience Result type using SessionError as the error type
pub type Result<T> = std::result::Result<T, SessionError>;
