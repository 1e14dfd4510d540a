//! Torrent-backed byte sources.
//!
//! The torrent protocol engine itself is an external collaborator; this
//! module defines the interface the gateway needs from it, the adapter that
//! turns a selected torrent file into a [`SourceFile`], and a simulated
//! client that backs magnets with local files for development and tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::RwLock;
use tracing::info;

use super::{SourceError, SourceFile, is_playable};
use crate::SessionError;

/// One file inside a torrent.
#[derive(Debug, Clone)]
pub struct TorrentFileEntry {
    /// Position in the torrent's file list
    pub index: usize,
    pub name: String,
    pub length: u64,
}

/// Live transfer statistics for a torrent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TorrentStats {
    pub num_peers: usize,
    /// Completion fraction in `[0, 1]`
    pub progress: f64,
    /// Bytes per second
    pub download_speed: u64,
    pub ratio: f64,
}

/// A torrent with resolved metadata.
#[async_trait::async_trait]
pub trait TorrentHandle: Send + Sync {
    fn name(&self) -> String;

    fn info_hash(&self) -> String;

    fn files(&self) -> Vec<TorrentFileEntry>;

    fn stats(&self) -> TorrentStats;

    /// Reads bytes of one torrent file, waiting for pieces to arrive.
    ///
    /// # Errors
    ///
    /// - `SourceError::InvalidRange` - the range exceeds the file
    /// - `SourceError::Torrent` - the engine failed
    async fn read_at(
        &self,
        file_index: usize,
        offset: u64,
        length: usize,
    ) -> Result<Bytes, SourceError>;
}

impl std::fmt::Debug for dyn TorrentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentHandle")
            .field("name", &self.name())
            .field("info_hash", &self.info_hash())
            .finish_non_exhaustive()
    }
}

/// The torrent protocol engine as the gateway sees it.
#[async_trait::async_trait]
pub trait TorrentClient: Send + Sync {
    /// Adds a magnet and resolves once metadata (the file list) is known.
    ///
    /// # Errors
    ///
    /// - `SessionError::Torrent` - invalid magnet or engine failure
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn TorrentHandle>, SessionError>;
}

/// Picks the first file with a playable video extension.
pub fn select_playable_file(files: &[TorrentFileEntry]) -> Option<TorrentFileEntry> {
    files.iter().find(|file| is_playable(&file.name)).cloned()
}

/// Extracts the lowercased info hash from a magnet URI.
pub fn parse_info_hash(magnet: &str) -> Option<String> {
    let start = magnet.find("btih:")? + "btih:".len();
    let rest = &magnet[start..];
    let end = rest.find('&').unwrap_or(rest.len());
    let hash = &rest[..end];
    if hash.is_empty() {
        None
    } else {
        Some(hash.to_ascii_lowercase())
    }
}

/// [`SourceFile`] view of one file inside a live torrent.
///
/// Reads go straight to the torrent engine; nothing is staged on disk.
pub struct TorrentSourceFile {
    handle: Arc<dyn TorrentHandle>,
    entry: TorrentFileEntry,
}

impl TorrentSourceFile {
    pub fn new(handle: Arc<dyn TorrentHandle>, entry: TorrentFileEntry) -> Self {
        Self { handle, entry }
    }
}

#[async_trait::async_trait]
impl SourceFile for TorrentSourceFile {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn len(&self) -> u64 {
        self.entry.length
    }

    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, SourceError> {
        if offset + length as u64 > self.entry.length {
            return Err(SourceError::InvalidRange {
                offset,
                length,
                file_size: self.entry.length,
            });
        }
        self.handle.read_at(self.entry.index, offset, length).await
    }
}

/// Simulated torrent client backing magnets with local files.
///
/// Development mode registers media files under synthetic info hashes; a
/// magnet whose `btih` matches a registered hash resolves to a single-file
/// torrent reading from local disk. Tests register multi-file torrents
/// directly via [`SimulatedTorrentClient::register_torrent`].
#[derive(Default)]
pub struct SimulatedTorrentClient {
    torrents: RwLock<HashMap<String, Arc<SimulatedTorrent>>>,
}

struct SimulatedFile {
    name: String,
    path: PathBuf,
    length: u64,
}

struct SimulatedTorrent {
    name: String,
    info_hash: String,
    files: Vec<SimulatedFile>,
}

impl SimulatedTorrentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single local file as a torrent under `info_hash`.
    ///
    /// # Errors
    ///
    /// - `SessionError::Storage` - the file cannot be inspected
    pub async fn register_file(
        &self,
        info_hash: &str,
        path: PathBuf,
    ) -> Result<(), SessionError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        self.register_torrent(info_hash, &name, vec![(name.clone(), path)])
            .await
    }

    /// Registers a multi-file torrent under `info_hash`.
    ///
    /// # Errors
    ///
    /// - `SessionError::Storage` - a file cannot be inspected
    pub async fn register_torrent(
        &self,
        info_hash: &str,
        name: &str,
        files: Vec<(String, PathBuf)>,
    ) -> Result<(), SessionError> {
        let mut entries = Vec::with_capacity(files.len());
        for (file_name, path) in files {
            let length = std::fs::metadata(&path)
                .map_err(|e| SessionError::Storage(format!("stat {}: {e}", path.display())))?
                .len();
            entries.push(SimulatedFile {
                name: file_name,
                path,
                length,
            });
        }

        let info_hash = info_hash.to_ascii_lowercase();
        info!(info_hash = %info_hash, name, files = entries.len(), "registered simulated torrent");
        self.torrents.write().await.insert(
            info_hash.clone(),
            Arc::new(SimulatedTorrent {
                name: name.to_string(),
                info_hash,
                files: entries,
            }),
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl TorrentClient for SimulatedTorrentClient {
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn TorrentHandle>, SessionError> {
        let info_hash = parse_info_hash(magnet)
            .ok_or_else(|| SessionError::Torrent(format!("invalid magnet uri: {magnet}")))?;

        let torrent = self
            .torrents
            .read()
            .await
            .get(&info_hash)
            .cloned()
            .ok_or_else(|| SessionError::Torrent(format!("unknown torrent {info_hash}")))?;

        Ok(Arc::new(SimulatedTorrentHandle { torrent }))
    }
}

struct SimulatedTorrentHandle {
    torrent: Arc<SimulatedTorrent>,
}

#[async_trait::async_trait]
impl TorrentHandle for SimulatedTorrentHandle {
    fn name(&self) -> String {
        self.torrent.name.clone()
    }

    fn info_hash(&self) -> String {
        self.torrent.info_hash.clone()
    }

    fn files(&self) -> Vec<TorrentFileEntry> {
        self.torrent
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| TorrentFileEntry {
                index,
                name: file.name.clone(),
                length: file.length,
            })
            .collect()
    }

    fn stats(&self) -> TorrentStats {
        TorrentStats {
            num_peers: 1,
            progress: 1.0,
            download_speed: 0,
            ratio: 0.0,
        }
    }

    async fn read_at(
        &self,
        file_index: usize,
        offset: u64,
        length: usize,
    ) -> Result<Bytes, SourceError> {
        let file = self
            .torrent
            .files
            .get(file_index)
            .ok_or_else(|| SourceError::Torrent(format!("no file at index {file_index}")))?;
        if offset + length as u64 > file.length {
            return Err(SourceError::InvalidRange {
                offset,
                length,
                file_size: file.length,
            });
        }

        let mut handle = tokio::fs::File::open(&file.path).await?;
        handle.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; length];
        handle.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}
