//! Bounded FIFO admission of transcoder jobs.
//!
//! One scheduler per process. Jobs queue strictly first-in-first-out and are
//! admitted while the running count stays under the tuning plan's cap, which
//! is re-derived on every admission decision. A job's terminal edge releases
//! its slot and immediately re-attempts admission.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ffmpeg::{TranscodeInput, TranscodeOptions, TranscodeOutcome, Transcoder};
use crate::SessionError;
use crate::config::{ResourceConfig, SegmentConfig};
use crate::resources::{ResourceWatcher, TuningPlan};
use crate::session::{SessionId, SessionRegistry, SessionState};

/// Unique identifier for transcoder jobs, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending transcoder job.
pub struct TranscodeJob {
    pub id: JobId,
    pub session_id: SessionId,
    pub input: TranscodeInput,
    pub options: TranscodeOptions,
    pub output_dir: PathBuf,
}

impl TranscodeJob {
    pub fn new(
        session_id: SessionId,
        input: TranscodeInput,
        options: TranscodeOptions,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            id: JobId::new(),
            session_id,
            input,
            options,
            output_dir,
        }
    }
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SchedulerStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

struct Inner {
    queue: VecDeque<TranscodeJob>,
    active: usize,
}

/// Process-wide transcoder admission control.
pub struct TranscodeScheduler {
    inner: Mutex<Inner>,
    registry: Arc<SessionRegistry>,
    watcher: Arc<ResourceWatcher>,
    transcoder: Arc<dyn Transcoder>,
    segments: SegmentConfig,
    resources: ResourceConfig,
}

impl TranscodeScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        watcher: Arc<ResourceWatcher>,
        transcoder: Arc<dyn Transcoder>,
        segments: SegmentConfig,
        resources: ResourceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                active: 0,
            }),
            registry,
            watcher,
            transcoder,
            segments,
            resources,
        })
    }

    /// Current tuning plan, re-derived from the live probe and session count.
    pub async fn plan(&self) -> TuningPlan {
        TuningPlan::derive(
            self.watcher.current().await,
            self.registry.active_count().await,
            &self.segments,
            &self.resources,
        )
    }

    /// Enqueues a job and immediately attempts admission.
    pub async fn submit(self: &Arc<Self>, job: TranscodeJob) {
        debug!(job = %job.id, session = %job.session_id, "job submitted");
        self.inner.lock().await.queue.push_back(job);
        self.admit().await;
    }

    /// Admits queued jobs while capacity allows. Non-blocking with respect
    /// to the jobs themselves; subprocesses are monitored by spawned tasks.
    fn admit<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.admit_inner())
    }

    async fn admit_inner(self: &Arc<Self>) {
        loop {
            let max_concurrent = self.plan().await.max_concurrent;
            let job = {
                let mut inner = self.inner.lock().await;
                if inner.active >= max_concurrent {
                    return;
                }
                match inner.queue.pop_front() {
                    Some(job) => {
                        inner.active += 1;
                        job
                    }
                    None => return,
                }
            };

            if !self.start(job).await {
                // Slot was reserved but the job never started
                self.inner.lock().await.active -= 1;
            }
        }
    }

    /// Starts one admitted job. Returns false when no subprocess came up.
    async fn start(self: &Arc<Self>, job: TranscodeJob) -> bool {
        let session_id = job.session_id.clone();

        let transitioned = self
            .registry
            .update(&session_id, |session| {
                session.transition(SessionState::Transcoding)
            })
            .await
            .and_then(|inner| inner);
        if let Err(e) = transitioned {
            warn!(session = %session_id, error = %e, "skipping job, session not admissible");
            return false;
        }

        match self
            .transcoder
            .spawn(job.input, &job.output_dir, &job.options)
            .await
        {
            Ok(handle) => {
                let kill = handle.kill_signal();
                let _ = self
                    .registry
                    .update(&session_id, |session| {
                        session.transcode_kill = Some(kill);
                    })
                    .await;

                info!(job = %job.id, session = %session_id, "transcoder started");

                let scheduler = Arc::clone(self);
                tokio::spawn(async move {
                    match handle.wait().await {
                        TranscodeOutcome::Finished => {
                            info!(session = %session_id, "transcoder finished");
                        }
                        TranscodeOutcome::Failed(message) => {
                            let _ = scheduler
                                .registry
                                .update(&session_id, |session| {
                                    session.fail(SessionError::Transcoder(message.clone()));
                                })
                                .await;
                        }
                    }
                    scheduler.release().await;
                });
                true
            }
            Err(e) => {
                let _ = self
                    .registry
                    .update(&session_id, |session| session.fail(e.clone()))
                    .await;
                false
            }
        }
    }

    /// Frees one slot and re-attempts admission.
    async fn release(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            inner.active = inner.active.saturating_sub(1);
        }
        self.admit().await;
    }

    pub async fn stats(&self) -> SchedulerStats {
        let max_concurrent = self.plan().await.max_concurrent;
        let inner = self.inner.lock().await;
        SchedulerStats {
            active: inner.active,
            queued: inner.queue.len(),
            max_concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::SourceKind;
    use crate::transcode::ffmpeg::SimulationTranscoder;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<SessionRegistry>,
        scheduler: Arc<TranscodeScheduler>,
        transcoder: Arc<SimulationTranscoder>,
    }

    fn fixture(max_concurrent: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new(dir.path().to_path_buf()));
        // Empty cgroup root falls through to OS limits; the explicit override
        // keeps the cap deterministic regardless of the test machine.
        let watcher = ResourceWatcher::with_cgroup_root(dir.path().join("no-cgroup"));
        let transcoder = Arc::new(SimulationTranscoder::manual());
        let scheduler = TranscodeScheduler::new(
            Arc::clone(&registry),
            watcher,
            Arc::clone(&transcoder) as Arc<dyn Transcoder>,
            SegmentConfig::default(),
            ResourceConfig {
                max_concurrent_override: Some(max_concurrent),
                ..Default::default()
            },
        );
        Fixture {
            _dir: dir,
            registry,
            scheduler,
            transcoder,
        }
    }

    async fn queued_session(fixture: &Fixture) -> SessionId {
        let id = fixture
            .registry
            .create(SourceKind::Url, 4)
            .await
            .unwrap();
        fixture
            .registry
            .update(&id, |s| {
                s.transition(SessionState::Resolving).unwrap();
                s.transition(SessionState::Queued).unwrap();
            })
            .await
            .unwrap();
        id
    }

    async fn submit(fixture: &Fixture, id: &SessionId) {
        let folder = fixture
            .registry
            .lookup(id)
            .await
            .unwrap()
            .read()
            .await
            .folder
            .clone();
        fixture
            .scheduler
            .submit(TranscodeJob::new(
                id.clone(),
                TranscodeInput::File(PathBuf::from("/dev/null")),
                TranscodeOptions {
                    mode: crate::transcode::ffmpeg::TranscodeMode::CopyMux,
                    segment_duration_secs: 4,
                    threads: 1,
                },
                folder,
            ))
            .await;
    }

    async fn state_of(fixture: &Fixture, id: &SessionId) -> SessionState {
        fixture
            .registry
            .lookup(id)
            .await
            .unwrap()
            .read()
            .await
            .state
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn admission_respects_concurrency_cap() {
        let fixture = fixture(2);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = queued_session(&fixture).await;
            submit(&fixture, &id).await;
            ids.push(id);
        }

        let stats = fixture.scheduler.stats().await;
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queued, 3);

        assert_eq!(state_of(&fixture, &ids[0]).await, SessionState::Transcoding);
        assert_eq!(state_of(&fixture, &ids[1]).await, SessionState::Transcoding);
        assert_eq!(state_of(&fixture, &ids[2]).await, SessionState::Queued);
        assert_eq!(state_of(&fixture, &ids[4]).await, SessionState::Queued);
    }

    #[tokio::test]
    async fn completion_admits_next_in_fifo_order() {
        let fixture = fixture(2);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let id = queued_session(&fixture).await;
            submit(&fixture, &id).await;
            ids.push(id);
        }

        assert!(fixture.transcoder.finish_next(TranscodeOutcome::Finished).await);

        let third = ids[2].clone();
        let fixture_ref = &fixture;
        wait_until(move || {
            let id = third.clone();
            async move { state_of(fixture_ref, &id).await == SessionState::Transcoding }
        })
        .await;

        // The fourth stays queued until another slot frees
        assert_eq!(state_of(&fixture, &ids[3]).await, SessionState::Queued);
        let stats = fixture.scheduler.stats().await;
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn failed_job_fails_session_and_frees_slot() {
        let fixture = fixture(1);
        let first = queued_session(&fixture).await;
        let second = queued_session(&fixture).await;
        submit(&fixture, &first).await;
        submit(&fixture, &second).await;

        assert!(
            fixture
                .transcoder
                .finish_next(TranscodeOutcome::Failed("codec exploded".to_string()))
                .await
        );

        let first_clone = first.clone();
        let fixture_ref = &fixture;
        wait_until(move || {
            let id = first_clone.clone();
            async move { state_of(fixture_ref, &id).await == SessionState::Failed }
        })
        .await;

        let record = fixture.registry.lookup(&first).await.unwrap();
        let session = record.read().await;
        match &session.error {
            Some(SessionError::Transcoder(msg)) => assert!(msg.contains("codec exploded")),
            other => panic!("expected transcoder error, got {other:?}"),
        }
        drop(session);

        let second_clone = second.clone();
        wait_until(move || {
            let id = second_clone.clone();
            async move { state_of(fixture_ref, &id).await == SessionState::Transcoding }
        })
        .await;
    }

    #[tokio::test]
    async fn closed_session_is_skipped_without_leaking_a_slot() {
        let fixture = fixture(1);
        let closed = queued_session(&fixture).await;
        fixture.registry.close(&closed).await.unwrap();

        let live = queued_session(&fixture).await;
        submit(&fixture, &closed).await;
        submit(&fixture, &live).await;

        let fixture_ref = &fixture;
        let live_clone = live.clone();
        wait_until(move || {
            let id = live_clone.clone();
            async move { state_of(fixture_ref, &id).await == SessionState::Transcoding }
        })
        .await;

        let stats = fixture.scheduler.stats().await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.queued, 0);
    }
}
