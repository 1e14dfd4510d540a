//! URL-backed sources staged through the downloader subprocess.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tracing::{debug, info};

use super::{SourceError, SourceFile, is_playable};
use crate::SessionError;

/// Stages remote URLs into the session folder with a `yt-dlp`-style
/// downloader subprocess.
pub struct UrlDownloader {
    downloader_path: PathBuf,
}

impl UrlDownloader {
    pub fn new(downloader_path: PathBuf) -> Self {
        Self { downloader_path }
    }

    /// Downloads `url` into `folder` and returns the staged playable file.
    ///
    /// # Errors
    ///
    /// - `SessionError::ToolFailed` - downloader exited non-zero
    /// - `SessionError::NoPlayableFile` - download produced no playable file
    pub async fn stage(&self, url: &str, folder: &Path) -> Result<PathBuf, SessionError> {
        let template = folder.join("%(title)s.%(ext)s");
        debug!(url, folder = %folder.display(), "staging url download");

        let output = Command::new(&self.downloader_path)
            .arg("-f")
            .arg("best")
            .arg("-o")
            .arg(&template)
            .arg(url)
            .output()
            .await
            .map_err(|e| {
                SessionError::ToolFailed(format!(
                    "spawning {}: {e}",
                    self.downloader_path.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::ToolFailed(format!(
                "downloader exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let staged = find_playable_in(folder).ok_or(SessionError::NoPlayableFile)?;
        info!(file = %staged.display(), "url download staged");
        Ok(staged)
    }
}

/// First file in `folder` with a playable extension, sorted by name so the
/// scan is deterministic.
pub fn find_playable_in(folder: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(folder)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    entries.into_iter().find(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(is_playable)
            .unwrap_or(false)
    })
}

/// [`SourceFile`] over a fully staged local file.
pub struct LocalSourceFile {
    path: PathBuf,
    name: String,
    length: u64,
}

impl LocalSourceFile {
    /// # Errors
    ///
    /// - `SessionError::Storage` - the file cannot be inspected
    pub fn open(path: PathBuf) -> Result<Arc<Self>, SessionError> {
        let length = std::fs::metadata(&path)
            .map_err(|e| SessionError::Storage(format!("stat {}: {e}", path.display())))?
            .len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media")
            .to_string();
        Ok(Arc::new(Self { path, name, length }))
    }
}

#[async_trait::async_trait]
impl SourceFile for LocalSourceFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.length
    }

    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, SourceError> {
        if offset + length as u64 > self.length {
            return Err(SourceError::InvalidRange {
                offset,
                length,
                file_size: self.length,
            });
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_playable_skips_non_media_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a.webm"), b"x").unwrap();

        let found = find_playable_in(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "a.webm");
    }

    #[test]
    fn find_playable_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_playable_in(dir.path()).is_none());
    }

    #[tokio::test]
    async fn local_source_file_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"0123456789").unwrap();

        let source = LocalSourceFile::open(path).unwrap();
        assert_eq!(source.name(), "clip.mp4");
        assert_eq!(source.len(), 10);

        let bytes = source.read_at(3, 4).await.unwrap();
        assert_eq!(&bytes[..], b"3456");

        // Single byte at the first position
        let bytes = source.read_at(0, 1).await.unwrap();
        assert_eq!(&bytes[..], b"0");

        let err = source.read_at(8, 5).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidRange { .. }));
    }
}
