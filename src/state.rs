//! Observable session state.

use std::fmt;

use tokio::sync::watch;

use crate::ErrorKind;

/// Lifecycle state of a voice session.
///
/// The controller is the only writer. Everything else observes it through a
/// [`watch::Receiver`] obtained from
/// [`SessionController::watch_state()`](crate::SessionController::watch_state).
///
/// Transitions are monotonic:
///
/// ```text
/// Idle → Connecting → Open → Closing → Closed
///             │         │
///             └─────────┴──→ Failed(kind)
/// ```
///
/// The only way back to `Idle` is an explicit reconnect from `Failed` or
/// `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session has been opened yet.
    #[default]
    Idle,
    /// Connecting to the remote service and opening devices.
    Connecting,
    /// Audio is flowing in both directions.
    Open {
        /// Whether microphone frames are currently suppressed.
        muted: bool,
    },
    /// Teardown in progress.
    Closing,
    /// Session ended normally.
    Closed,
    /// Session ended because of a fatal error.
    Failed(ErrorKind),
}

impl SessionState {
    /// Returns `true` for `Closed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    /// Returns `true` while the session is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Short label for status indicators.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open { muted: false } => "listening",
            Self::Open { muted: true } => "muted",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed(_) => "error",
        }
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::{Closed, Closing, Connecting, Failed, Idle, Open};
        matches!(
            (self, next),
            (Idle, Connecting | Closing)
                | (Connecting, Open { .. } | Closing | Failed(_))
                | (Open { .. }, Open { .. } | Closing | Failed(_))
                | (Closing, Closed)
                | (Closed | Failed(_), Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed ({kind})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Single-writer cell publishing [`SessionState`] changes.
pub(crate) struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// Returns the previous state on success and the current state on refusal.
    #[cfg(test)]
    pub fn transition(&self, next: SessionState) -> Result<SessionState, SessionState> {
        self.transition_if(|current| current.can_transition_to(next), next)
    }

    /// Moves to `next` only if `predicate` holds for the current state and
    /// the transition is legal. The check and the write happen atomically.
    pub fn transition_if(
        &self,
        predicate: impl FnOnce(&SessionState) -> bool,
        next: SessionState,
    ) -> Result<SessionState, SessionState> {
        let mut outcome = Err(SessionState::Idle);
        self.tx.send_if_modified(|state| {
            let previous = *state;
            if predicate(state) && previous.can_transition_to(next) {
                *state = next;
                outcome = Ok(previous);
                previous != next
            } else {
                outcome = Err(previous);
                false
            }
        });
        if let Ok(previous) = outcome {
            if previous != next {
                tracing::info!(from = %previous, to = %next, "session state changed");
            }
        }
        outcome
    }
}
