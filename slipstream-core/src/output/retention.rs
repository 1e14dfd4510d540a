//! Rolling-window disk retention for session folders.
//!
//! Keeps a session's total file bytes under budget by deleting the oldest
//! unprotected segments first, then other files oldest-first. The playlist
//! and the newest `keep_segments` segments are never deleted, so a trailing
//! window around live playback always survives. Deletion is one file at a
//! time with the total re-checked, which makes the order deterministic and
//! the stop point exact.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;
use tracing::debug;

/// The playlist is never deleted, whatever the budget says.
pub const PLAYLIST_NAME: &str = "playlist.m3u8";

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^segment_(\d+)\.ts$").expect("segment pattern is valid"))
}

/// Whether a filename is an HLS segment produced by the transcoder.
pub fn is_segment_file(name: &str) -> bool {
    segment_pattern().is_match(name)
}

/// Numeric index of a segment filename, if it is one.
pub fn segment_index(name: &str) -> Option<u64> {
    segment_pattern()
        .captures(name)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// What one retention pass did.
#[derive(Debug, Default)]
pub struct RetentionReport {
    /// Filenames deleted, in deletion order
    pub deleted: Vec<String>,
    /// Folder total after the pass
    pub total_bytes: u64,
}

struct FolderFile {
    name: String,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

fn list_files(folder: &Path) -> std::io::Result<Vec<FolderFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push(FolderFile {
            name,
            path: entry.path(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(files)
}

/// Runs one retention pass over `folder`.
///
/// # Errors
///
/// Returns an error only when the directory itself cannot be listed;
/// individual deletion failures skip to the next candidate.
pub fn enforce_budget(
    folder: &Path,
    max_bytes: u64,
    keep_segments: usize,
) -> std::io::Result<RetentionReport> {
    let files = list_files(folder)?;
    let mut total: u64 = files.iter().map(|f| f.size).sum();

    let mut report = RetentionReport {
        deleted: Vec::new(),
        total_bytes: total,
    };
    if total <= max_bytes {
        return Ok(report);
    }

    let mut segments: Vec<&FolderFile> = files
        .iter()
        .filter(|f| is_segment_file(&f.name))
        .collect();
    segments.sort_by_key(|f| segment_index(&f.name).unwrap_or(u64::MAX));

    let protected_from = segments.len().saturating_sub(keep_segments);
    let expendable_segments = &segments[..protected_from];

    let mut others: Vec<&FolderFile> = files
        .iter()
        .filter(|f| !is_segment_file(&f.name) && f.name != PLAYLIST_NAME)
        .collect();
    others.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.name.cmp(&b.name)));

    for file in expendable_segments.iter().chain(others.iter()) {
        if total <= max_bytes {
            break;
        }
        match std::fs::remove_file(&file.path) {
            Ok(()) => {
                debug!(file = %file.name, size = file.size, "retention deleted");
                total = total.saturating_sub(file.size);
                report.deleted.push(file.name.clone());
            }
            Err(e) => {
                debug!(file = %file.name, error = %e, "retention delete failed, skipping");
            }
        }
    }

    report.total_bytes = total;
    Ok(report)
}

/// Counts segment files currently in the folder.
pub fn count_segments(folder: &Path) -> u64 {
    std::fs::read_dir(folder)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| is_segment_file(&e.file_name().to_string_lossy()))
                .count() as u64
        })
        .unwrap_or(0)
}

/// Playlist readiness rule: the playlist exists, is non-trivial, and at
/// least one segment is on disk.
pub fn readiness_check(folder: &Path) -> Option<u64> {
    const MIN_PLAYLIST_BYTES: u64 = 100;

    let playlist = folder.join(PLAYLIST_NAME);
    let playlist_size = std::fs::metadata(&playlist).map(|m| m.len()).ok()?;
    if playlist_size <= MIN_PLAYLIST_BYTES {
        return None;
    }

    let segments = count_segments(folder);
    if segments == 0 {
        return None;
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_segment(dir: &Path, index: u64, bytes: usize) {
        std::fs::write(dir.join(format!("segment_{index:03}.ts")), vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn segment_name_matching() {
        assert!(is_segment_file("segment_000.ts"));
        assert!(is_segment_file("segment_1234.ts"));
        assert!(!is_segment_file("segment_abc.ts"));
        assert!(!is_segment_file("segment_001.ts.tmp"));
        assert!(!is_segment_file("playlist.m3u8"));
        assert_eq!(segment_index("segment_047.ts"), Some(47));
        assert_eq!(segment_index("other.ts"), None);
    }

    #[test]
    fn under_budget_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 0, 1000);
        std::fs::write(dir.path().join(PLAYLIST_NAME), vec![0u8; 200]).unwrap();

        let report = enforce_budget(dir.path(), 10_000, 5).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.total_bytes, 1200);
    }

    #[test]
    fn trims_oldest_segments_first_protecting_newest() {
        let dir = tempfile::tempdir().unwrap();
        for index in 0..50 {
            write_segment(dir.path(), index, 1_000_000);
        }
        std::fs::write(dir.path().join(PLAYLIST_NAME), vec![0u8; 500]).unwrap();

        let report = enforce_budget(dir.path(), 10_000_000, 3).unwrap();

        // Oldest deleted first
        assert_eq!(report.deleted.first().map(String::as_str), Some("segment_000.ts"));
        assert!(report.total_bytes <= 10_000_000);
        // Newest three segments and the playlist always survive
        assert!(dir.path().join("segment_047.ts").exists());
        assert!(dir.path().join("segment_048.ts").exists());
        assert!(dir.path().join("segment_049.ts").exists());
        assert!(dir.path().join(PLAYLIST_NAME).exists());
    }

    #[test]
    fn protected_segments_survive_even_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        for index in 0..5 {
            write_segment(dir.path(), index, 1000);
        }
        std::fs::write(dir.path().join(PLAYLIST_NAME), vec![0u8; 200]).unwrap();

        // Budget smaller than the protected window: everything unprotected
        // goes, the window and playlist stay.
        let report = enforce_budget(dir.path(), 1, 3).unwrap();
        assert_eq!(
            report.deleted,
            vec!["segment_000.ts".to_string(), "segment_001.ts".to_string()]
        );
        assert!(dir.path().join("segment_002.ts").exists());
        assert!(dir.path().join(PLAYLIST_NAME).exists());
    }

    #[test]
    fn others_deleted_after_segments_playlist_never() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 0, 1000);
        write_segment(dir.path(), 1, 1000);
        std::fs::write(dir.path().join("source.mkv"), vec![0u8; 4000]).unwrap();
        std::fs::write(dir.path().join(PLAYLIST_NAME), vec![0u8; 200]).unwrap();

        let report = enforce_budget(dir.path(), 1, 1).unwrap();
        // segment_000 first, then the staged source; segment_001 protected
        assert_eq!(
            report.deleted,
            vec!["segment_000.ts".to_string(), "source.mkv".to_string()]
        );
        assert!(dir.path().join(PLAYLIST_NAME).exists());
        assert!(dir.path().join("segment_001.ts").exists());
    }

    #[test]
    fn only_playlist_over_budget_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PLAYLIST_NAME), vec![0u8; 5000]).unwrap();

        let report = enforce_budget(dir.path(), 100, 5).unwrap();
        assert!(report.deleted.is_empty());
        assert!(dir.path().join(PLAYLIST_NAME).exists());
    }

    #[test]
    fn readiness_requires_fat_playlist_and_a_segment() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(readiness_check(dir.path()), None);

        // Trivial playlist is not enough
        std::fs::write(dir.path().join(PLAYLIST_NAME), vec![0u8; 50]).unwrap();
        write_segment(dir.path(), 0, 100);
        assert_eq!(readiness_check(dir.path()), None);

        // Playlist over 100 bytes but no segments is not enough either
        std::fs::remove_file(dir.path().join("segment_000.ts")).unwrap();
        std::fs::write(dir.path().join(PLAYLIST_NAME), vec![0u8; 200]).unwrap();
        assert_eq!(readiness_check(dir.path()), None);

        write_segment(dir.path(), 0, 100);
        write_segment(dir.path(), 1, 100);
        assert_eq!(readiness_check(dir.path()), Some(2));
    }
}
