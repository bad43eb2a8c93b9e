//! # live-voice
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time duplex voice sessions against a streaming speech model.
//!
//! `live-voice` captures the microphone, streams it to a remote service as
//! fixed-size PCM frames, and plays the service's spoken replies back
//! gaplessly. When the service reports that the user has barged in, every
//! buffered reply is cut immediately.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use live_voice::{SessionConfig, VoiceSession};
//!
//! let controller = VoiceSession::builder()
//!     .config(SessionConfig::from_env())                // LIVE_VOICE_API_KEY etc.
//!     .system_instruction("You are a friendly assistant.")
//!     .on_event(|e| tracing::warn!(?e, "session event"))
//!     .build()?;
//!
//! controller.open().await?;
//!
//! // Drive a status indicator
//! let mut state = controller.watch_state();
//! while state.changed().await.is_ok() {
//!     println!("{}", state.borrow().label());
//! }
//!
//! controller.close().await;
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Device Threads**: CPAL input and output callbacks that never block
//! - **Ring Buffer**: Lock-free SPSC queue carries microphone samples out of the callback
//! - **Timeline**: Short-lock schedule the output callback pulls from
//! - **Tokio Runtime**: Capture pump, transport reader/writer and event pump
//!
//! A slow network never stalls capture: outbound sends wait at most a short
//! timeout before the frame is dropped and reported.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
pub mod capture;
mod config;
pub mod device;
mod error;
mod event;
pub mod format;
mod frame;
pub mod playback;
mod session;
mod state;
pub mod transport;

pub use builder::{VoiceSession, VoiceSessionBuilder};
pub use config::{
    AudioFormat, SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, ENV_API_KEY, ENV_ENDPOINT, ENV_MODEL,
};
pub use error::{ErrorKind, VoiceError};
pub use event::{event_callback, EventCallback, SessionEvent};
pub use frame::{AudioFrame, OutboundPacket};
pub use session::{SessionController, SessionStats};
pub use state::SessionState;
