//! Source adapters: torrent magnets and remote URLs unified behind one
//! readable byte-source interface.

pub mod subtitles;
pub mod torrent;
pub mod url;

use bytes::Bytes;
use thiserror::Error;

/// Extensions the gateway considers playable video.
pub const PLAYABLE_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "flv"];

/// Returns true when the filename carries a playable video extension.
pub fn is_playable(name: &str) -> bool {
    extension_of(name)
        .map(|ext| PLAYABLE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Lowercased extension of a filename, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Provides a file-like async interface over a (possibly still arriving)
/// media source.
///
/// The torrent implementation blocks in `read_at` until the underlying
/// pieces arrive; the staged-file implementation reads from local disk.
/// Offsets and lengths are in terms of the complete logical file.
#[async_trait::async_trait]
pub trait SourceFile: Send + Sync {
    /// File name of the selected playable file.
    fn name(&self) -> &str;

    /// Total size of the logical file in bytes.
    fn len(&self) -> u64;

    /// True when the logical file is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a byte range, waiting for the data to become available.
    ///
    /// # Errors
    ///
    /// - `SourceError::InvalidRange` - the range exceeds the file bounds
    /// - `SourceError::Io` / `SourceError::Torrent` - the backend failed
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, SourceError>;
}

/// Errors from reading a byte source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The requested range exceeds the file size.
    #[error("invalid range: offset {offset} + length {length} exceeds file size {file_size}")]
    InvalidRange {
        offset: u64,
        length: usize,
        file_size: u64,
    },

    /// Local filesystem failure.
    #[error("source io error: {0}")]
    Io(#[from] std::io::Error),

    /// Torrent engine failure.
    #[error("torrent source error: {0}")]
    Torrent(String),
}
