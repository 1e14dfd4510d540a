//! Session lifecycle state machine.

/// Lifecycle state of a stream session.
///
/// `Ready` is sticky: once a playlist and segments exist the session never
/// regresses to `Transcoding`. Any state may move to `Closed` on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, source not yet looked at
    Pending,
    /// Source metadata being fetched or file being staged
    Resolving,
    /// Waiting for transcoder pool capacity
    Queued,
    /// Transcoder subprocess running, no usable output yet
    Transcoding,
    /// Playlist and at least one segment exist on disk
    Ready,
    /// Terminal error recorded on the session
    Failed,
    /// Torn down
    Closed,
}

impl SessionState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Queued)
                | (Resolving, Failed)
                | (Queued, Transcoding)
                | (Queued, Failed)
                | (Transcoding, Ready)
                | (Transcoding, Failed)
                | (Ready, Ready)
                | (_, Closed)
        )
    }

    /// Terminal states accept no further work.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }

    /// States that count toward the live session load.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Lowercase name used in snapshots and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Resolving => "resolving",
            SessionState::Queued => "queued",
            SessionState::Transcoding => "transcoding",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
