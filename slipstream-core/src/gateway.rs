//! The stream gateway: wiring between registry, sources, scheduler and
//! output supervision, exposed as the one service the HTTP layer talks to.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::SessionError;
use crate::config::SlipstreamConfig;
use crate::output::seek::{SeekInfo, SeekOutcome, SeekRequest, apply_seek, seek_info};
use crate::output::supervisor::OutputSupervisor;
use crate::resources::{ResourceLimits, ResourceWatcher, TuningPlan};
use crate::session::{
    ExtractedSubtitle, MediaInfo, SessionId, SessionRegistry, SessionState, SourceKind,
    SubtitleTrack,
};
use crate::source::subtitles;
use crate::source::torrent::{TorrentClient, TorrentSourceFile, select_playable_file};
use crate::source::url::{LocalSourceFile, UrlDownloader};
use crate::source::SourceFile;
use crate::transcode::ffmpeg::{
    MediaProber, TranscodeInput, TranscodeOptions, Transcoder, choose_mode,
};
use crate::transcode::scheduler::{SchedulerStats, TranscodeJob, TranscodeScheduler};

/// Injected collaborators the gateway cannot build itself.
pub struct GatewayDeps {
    pub torrent_client: Arc<dyn TorrentClient>,
    pub transcoder: Arc<dyn Transcoder>,
    pub prober: Arc<dyn MediaProber>,
}

/// Point-in-time session view served by `GET /status/:id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub ready: bool,
    pub state: &'static str,
    pub folder: String,
    pub file: Option<String>,
    pub error: Option<String>,
    pub created_at: u64,
    pub elapsed_seconds: u64,
    pub torrent_name: Option<String>,
    pub torrent_hash: Option<String>,
    pub num_peers: usize,
    /// Completion percentage, 0-100 with two decimals
    pub progress: f64,
    /// Bytes per second
    pub download_speed: u64,
    pub ratio: f64,
    pub hls_ready_at: Option<u64>,
    pub media_info: Option<MediaInfo>,
    pub available_subtitles: Vec<SubtitleTrack>,
    pub extracted_subtitles: Vec<ExtractedSubtitle>,
    pub seek_control: SeekControl,
}

/// Seek-related snapshot section.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekControl {
    pub current_position: u64,
    pub current_segment: u64,
    pub total_segments: u64,
    pub segment_duration: u32,
    pub support_range_requests: bool,
    pub can_seek: bool,
}

/// Subtitle listing served by `GET /subtitles-list/:id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitlesList {
    pub available: Vec<SubtitleTrack>,
    pub extracted: Vec<ExtractedSubtitle>,
    pub language_supported: Vec<&'static str>,
}

/// `GET /health` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime: u64,
    pub ffmpeg: bool,
    pub ffprobe: bool,
    pub active_streams: usize,
    pub features: Vec<&'static str>,
}

/// `GET /resources` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReport {
    pub limits: ResourceLimits,
    pub plan: TuningPlan,
    pub scheduler: SchedulerStats,
}

/// What the byte-range endpoint needs to serve a session's source.
pub struct StreamSource {
    pub source: Arc<dyn SourceFile>,
    pub ready: bool,
    pub subtitle_count: usize,
}

/// Service facade over all gateway components.
pub struct StreamGateway {
    config: SlipstreamConfig,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<TranscodeScheduler>,
    supervisor: Arc<OutputSupervisor>,
    watcher: Arc<ResourceWatcher>,
    torrent_client: Arc<dyn TorrentClient>,
    prober: Arc<dyn MediaProber>,
    downloader: UrlDownloader,
    ffmpeg_available: bool,
    ffprobe_available: bool,
    started_at: Instant,
}

impl StreamGateway {
    /// Builds the gateway and starts the resource watcher.
    pub fn new(config: SlipstreamConfig, deps: GatewayDeps) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.storage.session_root.clone()));
        let watcher = ResourceWatcher::new();
        watcher.spawn_watch(config.resources.watch_interval);

        let scheduler = TranscodeScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&watcher),
            Arc::clone(&deps.transcoder),
            config.segments.clone(),
            config.resources.clone(),
        );
        let supervisor = OutputSupervisor::new(Arc::clone(&registry), config.clone());

        let ffmpeg_available = deps.transcoder.is_available();
        let ffprobe_available = deps.prober.is_available();
        if !ffmpeg_available {
            error!("transcoder binary unavailable, sessions will fail until it appears on PATH");
        }

        let downloader = UrlDownloader::new(config.tools.downloader_path.clone());

        Arc::new(Self {
            config,
            registry,
            scheduler,
            supervisor,
            watcher,
            torrent_client: deps.torrent_client,
            prober: deps.prober,
            downloader,
            ffmpeg_available,
            ffprobe_available,
            started_at: Instant::now(),
        })
    }

    /// Registry accessor for embedders and tests.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Creates a torrent-backed session and starts resolution in the
    /// background.
    ///
    /// # Errors
    ///
    /// - `SessionError::BadRequest` - not a magnet URI
    /// - `SessionError::Storage` - session folder creation failed
    pub async fn create_torrent_session(
        self: &Arc<Self>,
        magnet: &str,
    ) -> Result<SessionId, SessionError> {
        if !magnet.starts_with("magnet:") {
            return Err(SessionError::BadRequest(format!(
                "not a magnet uri: {magnet}"
            )));
        }

        let duration = self.scheduler.plan().await.segment_duration_secs;
        let id = self
            .registry
            .create(SourceKind::Torrent, duration)
            .await?;

        let gateway = Arc::clone(self);
        let magnet = magnet.to_string();
        let session_id = id.clone();
        tokio::spawn(async move {
            gateway.resolve_torrent(session_id, magnet).await;
        });

        Ok(id)
    }

    /// Creates a URL-backed session and starts the download in the
    /// background.
    ///
    /// # Errors
    ///
    /// - `SessionError::BadRequest` - not an http(s) URL
    /// - `SessionError::Storage` - session folder creation failed
    pub async fn create_url_session(
        self: &Arc<Self>,
        url: &str,
    ) -> Result<SessionId, SessionError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SessionError::BadRequest(format!("not a valid url: {url}")));
        }

        let duration = self.scheduler.plan().await.segment_duration_secs;
        let id = self.registry.create(SourceKind::Url, duration).await?;

        let gateway = Arc::clone(self);
        let url = url.to_string();
        let session_id = id.clone();
        tokio::spawn(async move {
            gateway.resolve_url(session_id, url).await;
        });

        Ok(id)
    }

    /// Applies a transition, reporting whether the session is still on the
    /// happy path. Closed or failed sessions make this return false.
    async fn try_transition(&self, id: &SessionId, next: SessionState) -> bool {
        match self.registry.update(id, |s| s.transition(next)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(session = %id, error = %e, "resolution stopped");
                false
            }
            Err(_) => false,
        }
    }

    async fn fail_session(&self, id: &SessionId, error: SessionError) {
        let _ = self.registry.update(id, |s| s.fail(error.clone())).await;
    }

    async fn resolve_torrent(self: Arc<Self>, id: SessionId, magnet: String) {
        if !self.try_transition(&id, SessionState::Resolving).await {
            return;
        }

        let handle = match self.torrent_client.add_magnet(&magnet).await {
            Ok(handle) => handle,
            Err(e) => return self.fail_session(&id, e).await,
        };

        let files = handle.files();
        let entry = match select_playable_file(&files) {
            Some(entry) => entry,
            None => return self.fail_session(&id, SessionError::NoPlayableFile).await,
        };
        info!(session = %id, file = %entry.name, "selected playable file");

        let tracks = subtitles::detect_subtitles(&files);
        let source: Arc<dyn SourceFile> =
            Arc::new(TorrentSourceFile::new(Arc::clone(&handle), entry.clone()));

        let folder = match self
            .registry
            .update(&id, |session| {
                session.source = Some(Arc::clone(&source));
                session.torrent = Some(Arc::clone(&handle));
                session.subtitles_detected = tracks.clone();
                session.folder.clone()
            })
            .await
        {
            Ok(folder) => folder,
            Err(_) => return,
        };

        if !tracks.is_empty() {
            let gateway = Arc::clone(&self);
            let extraction_id = id.clone();
            let extraction_handle = Arc::clone(&handle);
            let extraction_folder = folder.clone();
            let extraction_tracks = tracks.clone();
            tokio::spawn(async move {
                let extracted = subtitles::extract_all(
                    extraction_handle,
                    &extraction_folder,
                    &extraction_tracks,
                )
                .await;
                let _ = gateway
                    .registry
                    .update(&extraction_id, |session| {
                        session.subtitles_extracted = extracted;
                    })
                    .await;
            });
        }

        self.start_transcode(&id, entry.name.as_str(), None, TranscodeInput::Stream(source), folder)
            .await;
    }

    async fn resolve_url(self: Arc<Self>, id: SessionId, url: String) {
        if !self.try_transition(&id, SessionState::Resolving).await {
            return;
        }

        let folder = match self.registry.lookup(&id).await {
            Ok(record) => record.read().await.folder.clone(),
            Err(_) => return,
        };

        let staged = match self.downloader.stage(&url, &folder).await {
            Ok(path) => path,
            Err(e) => return self.fail_session(&id, e).await,
        };

        let probe = if self.ffprobe_available {
            match self.prober.probe(&staged).await {
                Ok(report) => Some(report),
                Err(e) => {
                    // Media info is advisory; the stream still plays
                    warn!(session = %id, error = %e, "probe failed");
                    None
                }
            }
        } else {
            None
        };

        let source = match LocalSourceFile::open(staged.clone()) {
            Ok(source) => source,
            Err(e) => return self.fail_session(&id, e).await,
        };

        let name = source.name().to_string();
        let video_codec = probe.as_ref().and_then(|p| p.video_codec.clone());
        let _ = self
            .registry
            .update(&id, |session| {
                session.source = Some(source.clone() as Arc<dyn SourceFile>);
                session.media_info = probe
                    .as_ref()
                    .and_then(|p| p.duration_seconds)
                    .map(MediaInfo::from_duration);
            })
            .await;

        self.start_transcode(
            &id,
            &name,
            video_codec.as_deref(),
            TranscodeInput::File(staged),
            folder,
        )
        .await;
    }

    /// Common tail of both resolutions: queue the session, fix its segment
    /// duration, hand the job to the scheduler and start output watching.
    async fn start_transcode(
        self: &Arc<Self>,
        id: &SessionId,
        file_name: &str,
        video_codec: Option<&str>,
        input: TranscodeInput,
        folder: PathBuf,
    ) {
        if !self.ffmpeg_available {
            return self
                .fail_session(id, SessionError::ToolMissing("ffmpeg".to_string()))
                .await;
        }

        if !self.try_transition(id, SessionState::Queued).await {
            return;
        }

        let plan = self.scheduler.plan().await;
        let _ = self
            .registry
            .update(id, |session| {
                session.segment_duration_secs = plan.segment_duration_secs;
            })
            .await;

        let options = TranscodeOptions {
            mode: choose_mode(file_name, video_codec),
            segment_duration_secs: plan.segment_duration_secs,
            threads: plan.threads_per_transcoder,
        };
        info!(session = %id, ?options, "queueing transcode job");

        self.supervisor.watch(id.clone());
        self.scheduler
            .submit(TranscodeJob::new(id.clone(), input, options, folder))
            .await;
    }

    /// Assembles the status snapshot. Never blocks transcoding.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    pub async fn status(&self, id: &SessionId) -> Result<StatusSnapshot, SessionError> {
        let record = self.registry.lookup(id).await?;
        let session = record.read().await;

        let torrent_stats = session.torrent.as_ref().map(|t| t.stats());
        let progress = match (&torrent_stats, &session.source) {
            (Some(stats), _) => (stats.progress * 100.0 * 100.0).round() / 100.0,
            (None, Some(_)) => 100.0,
            (None, None) => 0.0,
        };

        Ok(StatusSnapshot {
            ready: session.state == SessionState::Ready,
            state: session.state.as_str(),
            folder: session.folder.display().to_string(),
            file: session.source.as_ref().map(|s| s.name().to_string()),
            error: session.error.as_ref().map(|e| e.to_string()),
            created_at: session.created_at_unix(),
            elapsed_seconds: session.elapsed_secs(),
            torrent_name: session.torrent.as_ref().map(|t| t.name()),
            torrent_hash: session.torrent.as_ref().map(|t| t.info_hash()),
            num_peers: torrent_stats.map(|s| s.num_peers).unwrap_or(0),
            progress,
            download_speed: torrent_stats.map(|s| s.download_speed).unwrap_or(0),
            ratio: torrent_stats.map(|s| s.ratio).unwrap_or(0.0),
            hls_ready_at: session.playlist_ready_at.and_then(|t| {
                t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).ok()
            }),
            media_info: session.media_info.clone(),
            available_subtitles: session.subtitles_detected.clone(),
            extracted_subtitles: session.subtitles_extracted.clone(),
            seek_control: SeekControl {
                current_position: session.playback_position_secs,
                current_segment: session.current_segment,
                total_segments: session.total_segments_observed,
                segment_duration: session.segment_duration_secs,
                support_range_requests: session.source.is_some(),
                can_seek: session.total_segments_observed > 0,
            },
        })
    }

    /// Moves the advisory seek cursor.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` / `BadRequest` / `OutOfRange`
    pub async fn seek(
        &self,
        id: &SessionId,
        request: &SeekRequest,
    ) -> Result<SeekOutcome, SessionError> {
        self.registry
            .update(id, |session| apply_seek(session, request))
            .await?
    }

    /// Seek position plus a window of segment descriptors.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    pub async fn seek_info(&self, id: &SessionId) -> Result<SeekInfo, SessionError> {
        let record = self.registry.lookup(id).await?;
        let session = record.read().await;
        let folder = session.folder.clone();
        Ok(seek_info(&session, &folder))
    }

    /// Subtitle listing for a session.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    pub async fn subtitles_list(&self, id: &SessionId) -> Result<SubtitlesList, SessionError> {
        let record = self.registry.lookup(id).await?;
        let session = record.read().await;
        Ok(SubtitlesList {
            available: session.subtitles_detected.clone(),
            extracted: session.subtitles_extracted.clone(),
            language_supported: subtitles::supported_languages(),
        })
    }

    /// Resolves a file inside the session folder, rejecting any path that
    /// escapes it.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    /// - `SessionError::AccessDenied` - path escapes the folder
    pub async fn session_file_path(
        &self,
        id: &SessionId,
        relative: &str,
    ) -> Result<PathBuf, SessionError> {
        let record = self.registry.lookup(id).await?;
        let folder = record.read().await.folder.clone();
        resolve_in_folder(&folder, relative)
    }

    /// Source handle and headers material for the byte-range endpoint.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id, or source not yet resolved
    pub async fn stream_source(&self, id: &SessionId) -> Result<StreamSource, SessionError> {
        let record = self.registry.lookup(id).await?;
        let session = record.read().await;
        let source = session
            .source
            .as_ref()
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("{id}: source not resolved yet")))?;
        Ok(StreamSource {
            source,
            ready: session.state == SessionState::Ready,
            subtitle_count: session.subtitles_extracted.len(),
        })
    }

    /// Client-initiated teardown: closes the session and removes its folder.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    pub async fn close_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let record = self.registry.lookup(id).await?;
        let folder = record.read().await.folder.clone();
        self.registry.close(id).await?;

        if let Err(e) = tokio::fs::remove_dir_all(&folder).await {
            warn!(session = %id, error = %e, "failed to remove session folder");
        }
        info!(session = %id, "session torn down");
        Ok(())
    }

    /// Closes every session; used on process shutdown.
    pub async fn shutdown(&self) {
        for id in self.registry.ids().await {
            let _ = self.registry.close(&id).await;
        }
        info!("all sessions closed");
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: if self.ffmpeg_available { "ok" } else { "degraded" },
            uptime: self.started_at.elapsed().as_secs(),
            ffmpeg: self.ffmpeg_available,
            ffprobe: self.ffprobe_available,
            active_streams: self.registry.active_count().await,
            features: vec!["hls", "byte-range", "seek", "subtitles"],
        }
    }

    pub async fn resources(&self) -> ResourceReport {
        ResourceReport {
            limits: self.watcher.current().await,
            plan: self.scheduler.plan().await,
            scheduler: self.scheduler.stats().await,
        }
    }

    /// Configured listener port.
    pub fn port(&self) -> u16 {
        self.config.server.port
    }
}

/// Joins `relative` under `folder`, rejecting absolute paths and any parent
/// traversal so a request can never read outside its session.
fn resolve_in_folder(folder: &Path, relative: &str) -> Result<PathBuf, SessionError> {
    let rel = Path::new(relative);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(SessionError::AccessDenied(relative.to_string()));
    }

    let joined = folder.join(rel);
    if !joined.starts_with(folder) {
        return Err(SessionError::AccessDenied(relative.to_string()));
    }
    Ok(joined)
}
