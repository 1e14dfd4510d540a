//! Session record and its value types.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;
use tracing::warn;

use super::state::SessionState;
use crate::SessionError;
use crate::source::SourceFile;
use crate::source::torrent::TorrentHandle;

/// 8-hex-character session identifier, uniformly random.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(format!("{:08x}", rand::random::<u32>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where the session's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Torrent,
    Url,
}

/// Subtitle side-file discovered in the source.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubtitleTrack {
    pub name: String,
    pub ext: String,
    pub size: u64,
    /// 3-letter language code, or `"unknown"`
    pub language: String,
}

/// Subtitle written into the session folder.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtractedSubtitle {
    pub name: String,
    pub path: PathBuf,
    pub language: String,
    pub ext: String,
    pub size: u64,
}

/// Probed media information.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    pub duration_formatted: String,
}

impl MediaInfo {
    pub fn from_duration(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            duration_formatted: format_timestamp(duration_seconds.max(0.0) as u64),
        }
    }
}

/// Formats seconds as `HH:MM:SS`.
pub fn format_timestamp(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// One client-submitted stream, from creation to teardown.
///
/// Mutations happen under the registry's per-record lock; background loops
/// and HTTP handlers share the record through `Arc<RwLock<Session>>`.
pub struct Session {
    pub id: SessionId,
    pub source_kind: SourceKind,
    pub state: SessionState,
    pub created_at: Instant,
    pub created_at_wall: SystemTime,
    /// Directory owned exclusively by this session
    pub folder: PathBuf,
    /// Selected playable file; absent until resolution
    pub source: Option<Arc<dyn SourceFile>>,
    /// Live torrent handle for status snapshots (torrent sessions only)
    pub torrent: Option<Arc<dyn TorrentHandle>>,
    pub subtitles_detected: Vec<SubtitleTrack>,
    pub subtitles_extracted: Vec<ExtractedSubtitle>,
    pub media_info: Option<MediaInfo>,
    /// HLS segment length; immutable once transcoding has started
    pub segment_duration_secs: u32,
    /// Monotonic count of segment files observed on disk
    pub total_segments_observed: u64,
    /// Advisory client-maintained seek cursor
    pub playback_position_secs: u64,
    pub current_segment: u64,
    pub playlist_ready_at: Option<SystemTime>,
    /// Terminal error; set once, co-invariant with `Failed`
    pub error: Option<SessionError>,
    /// Fired on teardown so per-session loops and the transcoder stop
    pub shutdown: Arc<Notify>,
    /// Kill signal of the running transcoder job, if one was spawned
    pub transcode_kill: Option<Arc<Notify>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source_kind", &self.source_kind)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("created_at_wall", &self.created_at_wall)
            .field("folder", &self.folder)
            .field("source", &self.source.is_some())
            .field("torrent", &self.torrent.is_some())
            .field("subtitles_detected", &self.subtitles_detected)
            .field("subtitles_extracted", &self.subtitles_extracted)
            .field("media_info", &self.media_info)
            .field("segment_duration_secs", &self.segment_duration_secs)
            .field("total_segments_observed", &self.total_segments_observed)
            .field("playback_position_secs", &self.playback_position_secs)
            .field("current_segment", &self.current_segment)
            .field("playlist_ready_at", &self.playlist_ready_at)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        id: SessionId,
        source_kind: SourceKind,
        folder: PathBuf,
        segment_duration_secs: u32,
    ) -> Self {
        Self {
            id,
            source_kind,
            state: SessionState::Pending,
            created_at: Instant::now(),
            created_at_wall: SystemTime::now(),
            folder,
            source: None,
            torrent: None,
            subtitles_detected: Vec::new(),
            subtitles_extracted: Vec::new(),
            media_info: None,
            segment_duration_secs,
            total_segments_observed: 0,
            playback_position_secs: 0,
            current_segment: 0,
            playlist_ready_at: None,
            error: None,
            shutdown: Arc::new(Notify::new()),
            transcode_kill: None,
        }
    }

    /// Applies a lifecycle transition, rejecting edges the state machine
    /// does not allow.
    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Records a terminal error and moves the session to `Failed`.
    ///
    /// A session that already reached `Ready` stays sticky; the error is
    /// logged and dropped in that case.
    pub fn fail(&mut self, error: SessionError) {
        if self.state.can_transition_to(SessionState::Failed) {
            warn!(session = %self.id, error = %error, "session failed");
            self.error = Some(error);
            self.state = SessionState::Failed;
        } else {
            warn!(
                session = %self.id,
                state = %self.state,
                error = %error,
                "error after terminal or ready state, keeping state"
            );
        }
    }

    /// Marks the session ready, idempotently. Returns true on the first call.
    pub fn mark_ready(&mut self, segments_observed: u64) -> bool {
        if self.state != SessionState::Transcoding && self.state != SessionState::Ready {
            return false;
        }
        self.observe_segments(segments_observed);
        if self.state == SessionState::Ready {
            return false;
        }
        self.state = SessionState::Ready;
        self.playlist_ready_at = Some(SystemTime::now());
        true
    }

    /// Raises the observed segment count, never lowering it.
    pub fn observe_segments(&mut self, count: u64) {
        if count > self.total_segments_observed {
            self.total_segments_observed = count;
        }
    }

    /// Moves the advisory cursor, keeping position and segment in lockstep.
    pub fn set_cursor_segment(&mut self, segment: u64) {
        self.current_segment = segment;
        self.playback_position_secs = segment * u64::from(self.segment_duration_secs);
    }

    /// Seconds since creation, for status snapshots.
    pub fn elapsed_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }

    /// Creation time as a unix timestamp.
    pub fn created_at_unix(&self) -> u64 {
        self.created_at_wall
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            SessionId::generate(),
            SourceKind::Torrent,
            PathBuf::from("/tmp/test"),
            4,
        )
    }

    #[test]
    fn session_id_is_eight_hex_chars() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cursor_keeps_position_and_segment_in_lockstep() {
        let mut s = session();
        s.set_cursor_segment(4);
        assert_eq!(s.current_segment, 4);
        assert_eq!(s.playback_position_secs, 16);
    }

    #[test]
    fn fail_after_ready_keeps_ready() {
        let mut s = session();
        s.transition(SessionState::Resolving).unwrap();
        s.transition(SessionState::Queued).unwrap();
        s.transition(SessionState::Transcoding).unwrap();
        assert!(s.mark_ready(1));

        s.fail(SessionError::Transcoder("late error".into()));
        assert_eq!(s.state, SessionState::Ready);
        assert!(s.error.is_none());
    }

    #[test]
    fn fail_records_error_once() {
        let mut s = session();
        s.transition(SessionState::Resolving).unwrap();
        s.fail(SessionError::NoPlayableFile);
        assert_eq!(s.state, SessionState::Failed);
        assert!(matches!(s.error, Some(SessionError::NoPlayableFile)));

        // A second failure cannot overwrite the terminal error
        s.fail(SessionError::Torrent("noise".into()));
        assert!(matches!(s.error, Some(SessionError::NoPlayableFile)));
    }

    #[test]
    fn mark_ready_is_idempotent() {
        let mut s = session();
        s.transition(SessionState::Resolving).unwrap();
        s.transition(SessionState::Queued).unwrap();
        s.transition(SessionState::Transcoding).unwrap();

        assert!(s.mark_ready(3));
        let first_ready = s.playlist_ready_at;
        assert!(!s.mark_ready(5));
        assert_eq!(s.playlist_ready_at, first_ready);
        assert_eq!(s.total_segments_observed, 5);
    }

    #[test]
    fn observed_segments_never_decrease() {
        let mut s = session();
        s.observe_segments(10);
        s.observe_segments(7);
        assert_eq!(s.total_segments_observed, 10);
    }

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp(0), "00:00:00");
        assert_eq!(format_timestamp(16), "00:00:16");
        assert_eq!(format_timestamp(3661), "01:01:01");
        assert_eq!(format_timestamp(86_400), "24:00:00");
    }
}
