//! Transcoder and prober abstractions with production subprocess
//! implementations and a simulation for development and tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, error, info, warn};

use crate::SessionError;
use crate::source::{SourceFile, extension_of};

/// Chunk size fed from the source into the transcoder's stdin.
const FEED_CHUNK: usize = 256 * 1024;

/// Stderr lines retained for the failure message.
const STDERR_TAIL: usize = 20;

/// How the transcoder produces segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    /// Repackage existing H.264 frames without re-encoding
    CopyMux,
    /// Re-encode to H.264 baseline for maximum client compatibility
    BaselineEncode,
}

/// Picks the mode from the container extension and the probed video codec.
pub fn choose_mode(file_name: &str, video_codec: Option<&str>) -> TranscodeMode {
    if extension_of(file_name).as_deref() == Some("mp4") {
        return TranscodeMode::CopyMux;
    }
    if let Some(codec) = video_codec
        && codec.to_ascii_lowercase().contains("h264")
    {
        return TranscodeMode::CopyMux;
    }
    TranscodeMode::BaselineEncode
}

/// Where the transcoder reads its input from.
pub enum TranscodeInput {
    /// Live byte source pumped into stdin (torrent sessions)
    Stream(Arc<dyn SourceFile>),
    /// Fully staged local file (URL sessions)
    File(PathBuf),
}

/// Per-job transcoder settings, fixed at spawn time.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeOptions {
    pub mode: TranscodeMode,
    /// HLS segment length; immutable for the life of the job
    pub segment_duration_secs: u32,
    pub threads: usize,
}

/// Terminal edge of a transcoder job, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Finished,
    Failed(String),
}

/// Handle to a running transcoder job.
pub struct TranscodeHandle {
    done: oneshot::Receiver<TranscodeOutcome>,
    kill: Arc<Notify>,
}

impl TranscodeHandle {
    /// Signal that asks the job to terminate.
    pub fn kill_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.kill)
    }

    /// Waits for the terminal edge.
    pub async fn wait(self) -> TranscodeOutcome {
        self.done
            .await
            .unwrap_or_else(|_| TranscodeOutcome::Failed("transcoder task dropped".to_string()))
    }
}

/// Abstraction over the transcoder subprocess.
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Starts a transcoder job writing playlist + segments into `output_dir`.
    ///
    /// # Errors
    ///
    /// - `SessionError::ToolFailed` - the subprocess could not be spawned
    /// - `SessionError::Storage` - output files could not be created
    async fn spawn(
        &self,
        input: TranscodeInput,
        output_dir: &Path,
        options: &TranscodeOptions,
    ) -> Result<TranscodeHandle, SessionError>;

    /// Whether the transcoder binary is usable.
    fn is_available(&self) -> bool;
}

/// Builds the HLS argument list for the given input specifier.
pub fn build_hls_args(input: &str, output_dir: &Path, options: &TranscodeOptions) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    match options.mode {
        TranscodeMode::CopyMux => {
            args.extend([
                "-i".to_string(),
                input.to_string(),
                "-c:v".to_string(),
                "copy".to_string(),
                "-c:a".to_string(),
                "copy".to_string(),
                "-bsf:v".to_string(),
                "h264_mp4toannexb".to_string(),
            ]);
        }
        TranscodeMode::BaselineEncode => {
            args.extend([
                "-fflags".to_string(),
                "+nobuffer".to_string(),
                "-i".to_string(),
                input.to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-profile:v".to_string(),
                "baseline".to_string(),
                "-level".to_string(),
                "3.0".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
            ]);
        }
    }

    args.extend([
        "-threads".to_string(),
        options.threads.to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        options.segment_duration_secs.to_string(),
        "-hls_list_size".to_string(),
        "0".to_string(),
        "-start_number".to_string(),
        "0".to_string(),
        "-hls_segment_filename".to_string(),
        output_dir.join("segment_%03d.ts").to_string_lossy().into_owned(),
        output_dir.join("playlist.m3u8").to_string_lossy().into_owned(),
    ]);

    args
}

/// Production transcoder shelling out to ffmpeg.
pub struct ProductionTranscoder {
    ffmpeg_path: PathBuf,
}

impl ProductionTranscoder {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }

    /// Pumps source bytes into the transcoder's stdin until EOF or until the
    /// process goes away.
    fn spawn_input_pump(
        source: Arc<dyn SourceFile>,
        mut stdin: tokio::process::ChildStdin,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let file_size = source.len();
            let mut offset = 0u64;
            debug!(file_size, "input pump started");

            while offset < file_size {
                let chunk = FEED_CHUNK.min((file_size - offset) as usize);
                match source.read_at(offset, chunk).await {
                    Ok(bytes) => {
                        if let Err(e) = stdin.write_all(&bytes).await {
                            // Transcoder exited; nothing left to feed
                            warn!(error = %e, "stdin write failed, stopping pump");
                            break;
                        }
                        offset += bytes.len() as u64;
                    }
                    Err(e) => {
                        error!(error = %e, offset, "source read failed, stopping pump");
                        break;
                    }
                }
            }

            drop(stdin);
            debug!(fed = offset, "input pump finished");
        })
    }

    /// Drains stderr, logging every line and keeping a tail for the failure
    /// message.
    fn spawn_stderr_reader(
        stderr: tokio::process::ChildStderr,
        tail: Arc<Mutex<VecDeque<String>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    warn!("ffmpeg: {trimmed}");
                    let mut tail = tail.lock().await;
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(trimmed.to_string());
                }
                line.clear();
            }
        })
    }
}

#[async_trait::async_trait]
impl Transcoder for ProductionTranscoder {
    async fn spawn(
        &self,
        input: TranscodeInput,
        output_dir: &Path,
        options: &TranscodeOptions,
    ) -> Result<TranscodeHandle, SessionError> {
        let (input_arg, source) = match &input {
            TranscodeInput::Stream(source) => ("pipe:0".to_string(), Some(Arc::clone(source))),
            TranscodeInput::File(path) => (path.to_string_lossy().into_owned(), None),
        };

        let args = build_hls_args(&input_arg, output_dir, options);
        debug!(?args, "spawning transcoder");

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .stdin(if source.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn().map_err(|e| {
            SessionError::ToolFailed(format!("spawning {}: {e}", self.ffmpeg_path.display()))
        })?;

        let pump = source.and_then(|source| {
            child
                .stdin
                .take()
                .map(|stdin| Self::spawn_input_pump(source, stdin))
        });

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| Self::spawn_stderr_reader(stderr, Arc::clone(&stderr_tail)));

        let (done_tx, done_rx) = oneshot::channel();
        let kill = Arc::new(Notify::new());
        let kill_rx = Arc::clone(&kill);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => TranscodeOutcome::Finished,
                    Ok(status) => {
                        if let Some(reader) = stderr_reader {
                            let _ = reader.await;
                        }
                        let tail = stderr_tail.lock().await;
                        let detail = tail.iter().cloned().collect::<Vec<_>>().join("; ");
                        TranscodeOutcome::Failed(format!("exited with {status}: {detail}"))
                    }
                    Err(e) => TranscodeOutcome::Failed(format!("wait failed: {e}")),
                },
                _ = kill_rx.notified() => {
                    let _ = child.kill().await;
                    TranscodeOutcome::Failed("transcoder killed".to_string())
                }
            };

            if let Some(pump) = pump {
                pump.abort();
            }
            let _ = done_tx.send(outcome);
        });

        Ok(TranscodeHandle { done: done_rx, kill })
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Simulation transcoder for development and tests.
///
/// In auto mode every job immediately materializes a playlist and segments
/// into the output directory and finishes. In manual mode jobs stay running
/// until the test releases them with [`SimulationTranscoder::finish_next`],
/// which makes scheduler admission observable.
pub struct SimulationTranscoder {
    auto_complete: bool,
    segment_count: usize,
    segment_bytes: usize,
    pending: Mutex<VecDeque<oneshot::Sender<TranscodeOutcome>>>,
}

impl SimulationTranscoder {
    pub fn new() -> Self {
        Self {
            auto_complete: true,
            segment_count: 3,
            segment_bytes: 4096,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Jobs stay running until released via `finish_next`.
    pub fn manual() -> Self {
        Self {
            auto_complete: false,
            ..Self::new()
        }
    }

    pub fn with_segments(mut self, count: usize, bytes: usize) -> Self {
        self.segment_count = count;
        self.segment_bytes = bytes;
        self
    }

    /// Completes the oldest running manual job. Returns false when none runs.
    pub async fn finish_next(&self, outcome: TranscodeOutcome) -> bool {
        match self.pending.lock().await.pop_front() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Writes a plausible playlist plus segment files.
    async fn materialize(
        output_dir: &Path,
        segment_duration_secs: u32,
        segment_count: usize,
        segment_bytes: usize,
    ) -> std::io::Result<()> {
        let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        playlist.push_str(&format!("#EXT-X-TARGETDURATION:{segment_duration_secs}\n"));
        playlist.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");

        for index in 0..segment_count {
            let name = format!("segment_{index:03}.ts");
            tokio::fs::write(output_dir.join(&name), vec![0x47; segment_bytes]).await?;
            playlist.push_str(&format!("#EXTINF:{segment_duration_secs}.000000,\n{name}\n"));
        }
        playlist.push_str("#EXT-X-ENDLIST\n");

        tokio::fs::write(output_dir.join("playlist.m3u8"), playlist).await?;
        Ok(())
    }
}

impl Default for SimulationTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transcoder for SimulationTranscoder {
    async fn spawn(
        &self,
        _input: TranscodeInput,
        output_dir: &Path,
        options: &TranscodeOptions,
    ) -> Result<TranscodeHandle, SessionError> {
        let (done_tx, done_rx) = oneshot::channel();
        let kill = Arc::new(Notify::new());

        if self.auto_complete {
            Self::materialize(
                output_dir,
                options.segment_duration_secs,
                self.segment_count,
                self.segment_bytes,
            )
            .await
            .map_err(|e| SessionError::Storage(format!("materializing output: {e}")))?;
            let _ = done_tx.send(TranscodeOutcome::Finished);
        } else {
            let (trigger_tx, trigger_rx) = oneshot::channel::<TranscodeOutcome>();
            self.pending.lock().await.push_back(trigger_tx);
            let kill_rx = Arc::clone(&kill);
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    outcome = trigger_rx => outcome
                        .unwrap_or_else(|_| TranscodeOutcome::Failed("trigger dropped".to_string())),
                    _ = kill_rx.notified() => TranscodeOutcome::Failed("transcoder killed".to_string()),
                };
                let _ = done_tx.send(outcome);
            });
        }

        Ok(TranscodeHandle { done: done_rx, kill })
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Probed media facts the gateway cares about.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub duration_seconds: Option<f64>,
    pub video_codec: Option<String>,
}

/// Abstraction over the media prober.
#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    /// Probes a staged media file.
    ///
    /// # Errors
    ///
    /// - `SessionError::ToolFailed` - the prober failed or emitted garbage
    async fn probe(&self, path: &Path) -> Result<ProbeReport, SessionError>;

    /// Whether the prober binary is usable.
    fn is_available(&self) -> bool;
}

#[derive(serde::Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(serde::Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(serde::Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
}

/// Production prober shelling out to ffprobe with JSON output.
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    fn parse(stdout: &[u8]) -> Result<ProbeReport, SessionError> {
        let parsed: FfprobeOutput = serde_json::from_slice(stdout)
            .map_err(|e| SessionError::ToolFailed(format!("parsing ffprobe output: {e}")))?;

        let duration_seconds = parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok());
        let video_codec = parsed
            .streams
            .into_iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .and_then(|s| s.codec_name);

        Ok(ProbeReport {
            duration_seconds,
            video_codec,
        })
    }
}

#[async_trait::async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, SessionError> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                SessionError::ToolFailed(format!("spawning {}: {e}", self.ffprobe_path.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::ToolFailed(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let report = Self::parse(&output.stdout)?;
        info!(path = %path.display(), ?report, "media probed");
        Ok(report)
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Prober returning a fixed report, for tests.
pub struct StaticProber(pub ProbeReport);

#[async_trait::async_trait]
impl MediaProber for StaticProber {
    async fn probe(&self, _path: &Path) -> Result<ProbeReport, SessionError> {
        Ok(self.0.clone())
    }

    fn is_available(&self) -> bool {
        true
    }
}
