//! Advisory seek cursor operations.
//!
//! The server never plays anything back; these operations move a
//! client-shared cursor so multiple viewers can resume from the same
//! position. The cursor invariant is `current_segment × segment_duration =
//! playback_position`, maintained on every mutation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SessionError;
use crate::session::{Session, format_timestamp};

/// Window size of the segment descriptors returned by seek-info.
const WINDOW_SEGMENTS: u64 = 20;

/// Client seek request: by absolute time or by segment index.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SeekRequest {
    /// Target position in seconds
    pub time: Option<f64>,
    /// Target segment index
    pub segment: Option<u64>,
}

/// Result of a cursor move.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekOutcome {
    pub success: bool,
    pub current_segment: u64,
    pub playback_position: u64,
    pub playback_position_formatted: String,
    pub message: String,
}

/// One entry of the seek-info window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentDescriptor {
    pub index: u64,
    pub filename: String,
    pub start_seconds: u64,
    /// Whether the segment file is currently on disk (retention may have
    /// evicted it)
    pub available: bool,
}

/// Snapshot returned by seek-info.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekInfo {
    pub current_position: u64,
    pub current_position_formatted: String,
    pub current_segment: u64,
    pub total_segments: u64,
    pub segment_duration: u32,
    pub segments: Vec<SegmentDescriptor>,
}

fn check_range(session: &Session, segment: u64) -> Result<(), SessionError> {
    let total = session.total_segments_observed;
    if total > 0 && segment >= total {
        return Err(SessionError::OutOfRange(format!(
            "invalid segment {segment}, valid range: 0-{}",
            total - 1
        )));
    }
    Ok(())
}

/// Applies a seek request to the session's cursor.
///
/// # Errors
///
/// - `SessionError::BadRequest` - neither `time` nor `segment` given, or a
///   negative time
/// - `SessionError::OutOfRange` - target segment beyond the observed count
pub fn apply_seek(session: &mut Session, request: &SeekRequest) -> Result<SeekOutcome, SessionError> {
    let target_segment = match (request.time, request.segment) {
        (_, Some(segment)) => segment,
        (Some(time), None) => {
            if !time.is_finite() || time < 0.0 {
                return Err(SessionError::BadRequest(format!("invalid time {time}")));
            }
            (time as u64) / u64::from(session.segment_duration_secs.max(1))
        }
        (None, None) => {
            return Err(SessionError::BadRequest(
                "seek requires either time or segment".to_string(),
            ));
        }
    };

    check_range(session, target_segment)?;
    session.set_cursor_segment(target_segment);

    Ok(SeekOutcome {
        success: true,
        current_segment: session.current_segment,
        playback_position: session.playback_position_secs,
        playback_position_formatted: format_timestamp(session.playback_position_secs),
        message: format!("seeked to segment {target_segment}"),
    })
}

/// Builds the seek-info snapshot with a window of up to [`WINDOW_SEGMENTS`]
/// descriptors centred on the cursor, each checked against the disk.
pub fn seek_info(session: &Session, folder: &Path) -> SeekInfo {
    let total = session.total_segments_observed;
    let half = WINDOW_SEGMENTS / 2;

    let start = session.current_segment.saturating_sub(half);
    let end = total.min(start + WINDOW_SEGMENTS);

    let segments = (start..end)
        .map(|index| {
            let filename = format!("segment_{index:03}.ts");
            let available = folder.join(&filename).is_file();
            SegmentDescriptor {
                index,
                filename,
                start_seconds: index * u64::from(session.segment_duration_secs),
                available,
            }
        })
        .collect();

    SeekInfo {
        current_position: session.playback_position_secs,
        current_position_formatted: format_timestamp(session.playback_position_secs),
        current_segment: session.current_segment,
        total_segments: total,
        segment_duration: session.segment_duration_secs,
        segments,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::session::{SessionId, SourceKind};

    fn session(segment_duration: u32, total_segments: u64) -> Session {
        let mut s = Session::new(
            SessionId::generate(),
            SourceKind::Torrent,
            PathBuf::from("/tmp/none"),
            segment_duration,
        );
        s.observe_segments(total_segments);
        s
    }

    #[test]
    fn seek_by_time_floors_to_segment() {
        let mut s = session(4, 100);
        let outcome = apply_seek(
            &mut s,
            &SeekRequest {
                time: Some(17.0),
                segment: None,
            },
        )
        .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.current_segment, 4);
        assert_eq!(outcome.playback_position, 16);
        assert_eq!(outcome.playback_position_formatted, "00:00:16");
    }

    #[test]
    fn seek_by_segment_is_direct() {
        let mut s = session(4, 100);
        let outcome = apply_seek(
            &mut s,
            &SeekRequest {
                time: None,
                segment: Some(25),
            },
        )
        .unwrap();
        assert_eq!(outcome.current_segment, 25);
        assert_eq!(outcome.playback_position, 100);
    }

    #[test]
    fn seek_out_of_range_is_rejected() {
        let mut s = session(4, 100);
        let err = apply_seek(
            &mut s,
            &SeekRequest {
                time: None,
                segment: Some(999),
            },
        )
        .unwrap_err();
        match err {
            SessionError::OutOfRange(msg) => {
                assert_eq!(msg, "invalid segment 999, valid range: 0-99");
            }
            other => panic!("expected out of range, got {other}"),
        }
        // Cursor untouched
        assert_eq!(s.current_segment, 0);
    }

    #[test]
    fn seek_with_no_observed_segments_skips_range_check() {
        let mut s = session(4, 0);
        let outcome = apply_seek(
            &mut s,
            &SeekRequest {
                time: None,
                segment: Some(12),
            },
        )
        .unwrap();
        assert_eq!(outcome.current_segment, 12);
    }

    #[test]
    fn seek_requires_some_target() {
        let mut s = session(4, 10);
        let err = apply_seek(
            &mut s,
            &SeekRequest {
                time: None,
                segment: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::BadRequest(_)));

        let err = apply_seek(
            &mut s,
            &SeekRequest {
                time: Some(-3.0),
                segment: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::BadRequest(_)));
    }

    #[test]
    fn repeated_seek_is_idempotent() {
        let mut s = session(4, 100);
        let request = SeekRequest {
            time: Some(40.0),
            segment: None,
        };
        let first = apply_seek(&mut s, &request).unwrap();
        let second = apply_seek(&mut s, &request).unwrap();
        assert_eq!(first.current_segment, second.current_segment);
        assert_eq!(first.playback_position, second.playback_position);
        assert_eq!(s.current_segment, 10);
    }

    #[test]
    fn window_is_centred_and_checks_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("segment_030.ts"), b"x").unwrap();

        let mut s = session(4, 100);
        s.set_cursor_segment(30);

        let info = seek_info(&s, dir.path());
        assert_eq!(info.current_segment, 30);
        assert_eq!(info.segments.len(), 20);
        assert_eq!(info.segments.first().unwrap().index, 20);
        assert_eq!(info.segments.last().unwrap().index, 39);

        let present = info.segments.iter().find(|d| d.index == 30).unwrap();
        assert!(present.available);
        let evicted = info.segments.iter().find(|d| d.index == 25).unwrap();
        assert!(!evicted.available);
        assert_eq!(present.start_seconds, 120);
    }

    #[test]
    fn window_clips_at_the_edges() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(4, 8);
        s.set_cursor_segment(1);

        let info = seek_info(&s, dir.path());
        assert_eq!(info.segments.len(), 8);
        assert_eq!(info.segments.first().unwrap().index, 0);
    }
}
