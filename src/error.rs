//! Error types for live-voice.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`VoiceError`]): Prevent a session from opening, or end
//!   an open session. Each maps to an [`ErrorKind`] carried by
//!   [`SessionState::Failed`](crate::SessionState::Failed).
//! - **Recoverable events**: Dropped packets and undecodable chunks, surfaced
//!   via [`EventCallback`](crate::EventCallback) and logged.

use std::fmt;

use crate::state::SessionState;

/// Coarse classification of a failure.
///
/// `ErrorKind` is `Copy` so it can live inside [`SessionState`] and
/// [`InboundEvent`](crate::InboundEvent) without dragging error payloads
/// around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A capture or playback device could not be opened, or died mid-session.
    DeviceUnavailable,
    /// The initial handshake with the remote service failed.
    ConnectFailed,
    /// The connection failed while the session was open.
    Transport,
    /// A single inbound audio chunk could not be decoded.
    Decode,
    /// The remote service sent something we could not understand.
    Protocol,
    /// The operation is not allowed in the current session state.
    InvalidState,
    /// The session configuration is invalid.
    Config,
    /// The operation was cancelled by a concurrent `close()`.
    Cancelled,
}

impl ErrorKind {
    /// A single human-readable message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DeviceUnavailable => {
                "Microphone or speaker unavailable. Check permissions and connected devices."
            }
            Self::ConnectFailed => "Could not reach the voice service. Please try again.",
            Self::Transport => "The voice connection was lost. Reconnect to continue.",
            Self::Decode => "Some audio could not be played.",
            Self::Protocol => "The voice service sent an unexpected response.",
            Self::InvalidState => "That action is not available right now.",
            Self::Config => "The voice session is not configured correctly.",
            Self::Cancelled => "The voice session was closed.",
        }
    }

    /// Returns `true` if this kind of error ends the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DeviceUnavailable => "device unavailable",
            Self::ConnectFailed => "connect failed",
            Self::Transport => "transport error",
            Self::Decode => "decode error",
            Self::Protocol => "protocol error",
            Self::InvalidState => "invalid state",
            Self::Config => "invalid configuration",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors returned by live-voice operations.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// A capture or playback device could not be opened.
    #[error("audio device unavailable: {name} - {reason}")]
    DeviceUnavailable {
        /// Name of the device.
        name: String,
        /// Why it could not be used.
        reason: String,
    },

    /// The initial handshake with the remote service failed.
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectFailed {
        /// Endpoint we tried to reach (without credentials).
        endpoint: String,
        /// What went wrong.
        reason: String,
    },

    /// The connection failed mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound audio chunk could not be decoded.
    #[error("could not decode audio chunk: {0}")]
    Decode(String),

    /// The remote service sent a malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// State at the time of the attempt.
        state: SessionState,
    },

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A concurrent `close()` cancelled the operation.
    #[error("session open cancelled by close")]
    Cancelled,
}

impl VoiceError {
    /// Creates a device-unavailable error.
    pub fn device_unavailable(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a connect-failed error.
    pub fn connect_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
