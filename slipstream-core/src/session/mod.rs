//! Session records, lifecycle state machine and the process-wide registry.

pub mod registry;
pub mod state;
pub mod types;

pub use registry::SessionRegistry;
pub use state::SessionState;
pub use types::{
    ExtractedSubtitle, MediaInfo, Session, SessionId, SourceKind, SubtitleTrack, format_timestamp,
};
