//! Per-session output watching.
//!
//! Three recurring tasks per session: a fast readiness poll that ends once
//! the playlist becomes usable, a segment monitor that keeps the observed
//! count fresh for seek range checks, and the retention pass that holds the
//! folder under its byte budget for the session's whole lifetime.
//!
//! Polling is deliberate: transcoders rewrite the playlist atomically and
//! filesystem notification APIs differ across platforms. Transient I/O
//! errors are logged and swallowed; the next tick self-heals.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::retention;
use crate::config::SlipstreamConfig;
use crate::session::{SessionId, SessionRegistry, SessionState};

/// Cadence of the readiness poll.
const READINESS_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of the retention pass.
const RETENTION_INTERVAL: Duration = Duration::from_secs(15);

/// Spawns and owns the per-session output loops.
pub struct OutputSupervisor {
    registry: Arc<SessionRegistry>,
    config: SlipstreamConfig,
}

impl OutputSupervisor {
    pub fn new(registry: Arc<SessionRegistry>, config: SlipstreamConfig) -> Arc<Self> {
        Arc::new(Self { registry, config })
    }

    /// Starts watching one session. Called once when the session is queued.
    pub fn watch(self: &Arc<Self>, id: SessionId) {
        self.spawn_readiness(id.clone());
        self.spawn_segment_monitor(id.clone());
        self.spawn_retention(id);
    }

    async fn state_of(&self, id: &SessionId) -> Option<SessionState> {
        match self.registry.lookup(id).await {
            Ok(record) => Some(record.read().await.state),
            Err(_) => None,
        }
    }

    fn spawn_readiness(self: &Arc<Self>, id: SessionId) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(READINESS_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let state = match supervisor.state_of(&id).await {
                    Some(state) => state,
                    None => return,
                };
                match state {
                    SessionState::Ready | SessionState::Failed | SessionState::Closed => return,
                    SessionState::Transcoding => {}
                    // Nothing on disk yet before the transcoder starts
                    _ => continue,
                }

                let folder = match supervisor.registry.lookup(&id).await {
                    Ok(record) => record.read().await.folder.clone(),
                    Err(_) => return,
                };
                if let Some(segments) = retention::readiness_check(&folder) {
                    let became_ready = supervisor
                        .registry
                        .update(&id, |session| session.mark_ready(segments))
                        .await
                        .unwrap_or(false);
                    if became_ready {
                        info!(session = %id, segments, "session ready");
                    }
                    return;
                }
            }
        });
    }

    fn spawn_segment_monitor(self: &Arc<Self>, id: SessionId) {
        let supervisor = Arc::clone(self);
        let interval = self.config.segments.monitor_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match supervisor.state_of(&id).await {
                    None | Some(SessionState::Closed) | Some(SessionState::Failed) => return,
                    _ => {}
                }

                let folder = match supervisor.registry.lookup(&id).await {
                    Ok(record) => record.read().await.folder.clone(),
                    Err(_) => return,
                };
                let count = retention::count_segments(&folder);
                if count > 0 {
                    let _ = supervisor
                        .registry
                        .update(&id, |session| session.observe_segments(count))
                        .await;
                }
            }
        });
    }

    fn spawn_retention(self: &Arc<Self>, id: SessionId) {
        let supervisor = Arc::clone(self);
        let max_bytes = self.config.storage.max_session_bytes;
        let keep_segments = self.config.storage.keep_segments;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match supervisor.state_of(&id).await {
                    None | Some(SessionState::Closed) => return,
                    _ => {}
                }

                let folder = match supervisor.registry.lookup(&id).await {
                    Ok(record) => record.read().await.folder.clone(),
                    Err(_) => return,
                };
                match retention::enforce_budget(&folder, max_bytes, keep_segments) {
                    Ok(report) if !report.deleted.is_empty() => {
                        debug!(
                            session = %id,
                            deleted = report.deleted.len(),
                            total = report.total_bytes,
                            "retention trimmed session folder"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Transient; the next pass will retry
                        warn!(session = %id, error = %e, "retention pass failed");
                    }
                }
            }
        });
    }
}
