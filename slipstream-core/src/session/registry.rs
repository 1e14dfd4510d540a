//! Process-wide mapping from session id to session record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::state::SessionState;
use super::types::{Session, SessionId, SourceKind};
use crate::SessionError;

/// Shared handle to one session record.
pub type SessionRecord = Arc<RwLock<Session>>;

/// Concurrent registry of all sessions for the process lifetime.
///
/// Records are kept after close (as tombstones) so identifiers stay unique
/// for the lifetime of the process. Each record carries its own lock;
/// registry reads never block another session's mutation.
pub struct SessionRegistry {
    root: PathBuf,
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Allocates an id, creates the session folder and inserts the record
    /// in state `Pending`.
    ///
    /// # Errors
    ///
    /// - `SessionError::Storage` - the session directory cannot be created
    pub async fn create(
        &self,
        source_kind: SourceKind,
        segment_duration_secs: u32,
    ) -> Result<SessionId, SessionError> {
        let mut sessions = self.sessions.write().await;

        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let folder = self.root.join(id.as_str());
        std::fs::create_dir_all(&folder).map_err(|e| {
            SessionError::Storage(format!("creating {}: {e}", folder.display()))
        })?;

        let session = Session::new(id.clone(), source_kind, folder, segment_duration_secs);
        sessions.insert(id.clone(), Arc::new(RwLock::new(session)));

        info!(session = %id, kind = ?source_kind, "session created");
        Ok(id)
    }

    /// Looks up a record handle.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    pub async fn lookup(&self, id: &SessionId) -> Result<SessionRecord, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Applies a mutation under the record's exclusive lock.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    pub async fn update<F, R>(&self, id: &SessionId, mutate: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let record = self.lookup(id).await?;
        let mut session = record.write().await;
        Ok(mutate(&mut session))
    }

    /// Number of sessions in a non-terminal state.
    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut active = 0;
        for record in sessions.values() {
            if record.read().await.state.is_active() {
                active += 1;
            }
        }
        active
    }

    /// Ids of every session the registry knows about.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Moves a session to `Closed`, firing its shutdown signal so the
    /// transcoder and the per-session loops stop.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` - unknown id
    pub async fn close(&self, id: &SessionId) -> Result<(), SessionError> {
        let record = self.lookup(id).await?;
        let mut session = record.write().await;
        if session.state == SessionState::Closed {
            return Ok(());
        }
        session.state = SessionState::Closed;
        session.shutdown.notify_waiters();
        if let Some(kill) = session.transcode_kill.take() {
            // notify_one stores a permit, so a kill issued before the
            // monitor task starts waiting still lands
            kill.notify_one();
        }
        debug!(session = %id, "session closed");
        Ok(())
    }
}
