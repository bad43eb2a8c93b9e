//! Runtime diagnostics for monitoring session health.
//!
//! Events are non-fatal notifications. The session keeps running after any
//! of them is emitted; they exist for logging and metrics, not error
//! handling. Fatal conditions show up as
//! [`SessionState::Failed`](crate::SessionState::Failed) instead.

use std::sync::Arc;

use crate::SessionState;

/// Diagnostic events emitted while a session runs.
///
/// # Example
///
/// ```
/// use live_voice::SessionEvent;
///
/// fn handle_event(event: SessionEvent) {
///     match event {
///         SessionEvent::Degraded { sequence, dropped_total, .. } => {
///             eprintln!("dropped packet #{sequence} ({dropped_total} so far)");
///         }
///         SessionEvent::DecodeFailed { reason, .. } => {
///             eprintln!("skipped undecodable chunk: {reason}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An outbound packet was dropped because the connection stayed
    /// backpressured past the send timeout.
    Degraded {
        /// Sequence number of the dropped packet.
        sequence: u64,
        /// How long `send` waited before giving up.
        waited_ms: u64,
        /// Packets dropped so far in this session.
        dropped_total: u64,
    },

    /// An inbound audio chunk could not be decoded and was skipped.
    DecodeFailed {
        /// What was wrong with the chunk.
        reason: String,
        /// Decode failures so far in this session.
        failures: u64,
    },

    /// The inbound queue was full and the oldest audio chunk was evicted.
    InboundOverflow {
        /// Audio chunks evicted so far in this session.
        dropped_chunks: u64,
    },

    /// The remote party barged in and queued playback was discarded.
    Interrupted {
        /// Number of scheduled buffers that were stopped.
        discarded_buffers: usize,
    },

    /// The remote party finished a response turn.
    TurnComplete,

    /// The session state changed.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via
/// [`VoiceSessionBuilder::on_event()`](crate::VoiceSessionBuilder::on_event).
/// Callbacks may run on any task and must not block.
pub type EventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use live_voice::{event_callback, SessionEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(SessionEvent::TurnComplete);
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invokes `callback` with `event` if one is registered.
pub(crate) fn emit(callback: Option<&EventCallback>, event: SessionEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}
