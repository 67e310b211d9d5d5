//! Session lifecycle states.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// ```text
/// Uninitialized → Provisioning → Ready → Listening ⇄ Restarting
///                      │                     │
///                      └→ Failed             └→ Ready (stop)
/// any state → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Waiting for the model provider.
    Provisioning,
    /// Model loaded, not listening.
    Ready,
    /// An engine instance is live for the current utterance.
    Listening,
    /// Utterance ended; a restart is scheduled.
    Restarting,
    /// Provisioning failed. The session never becomes ready.
    Failed,
    /// Closed. Terminal.
    Closed,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if self == Closed {
            return false;
        }
        if next == Closed {
            return true;
        }

        matches!(
            (self, next),
            (Uninitialized, Provisioning)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Listening)
                | (Listening, Listening)
                | (Listening, Restarting)
                | (Listening, Ready)
                | (Restarting, Listening)
                | (Restarting, Ready)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Provisioning => "provisioning",
            SessionState::Ready => "ready",
            SessionState::Listening => "listening",
            SessionState::Restarting => "restarting",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
