//! Builder pattern for `VoiceSession`.

use std::sync::Arc;

use crate::capture::{CpalInput, InputDevice};
use crate::playback::{CpalOutput, OutputDevice};
use crate::session::{Backends, SessionController};
use crate::transport::{Connector, WebSocketConnector};
use crate::{event_callback, EventCallback, SessionConfig, SessionEvent, VoiceError};

/// Builder for configuring a voice session.
///
/// Use [`VoiceSession::builder()`] to create a new builder. Unset devices
/// default to the system's default microphone and speaker; an unset
/// connector defaults to a WebSocket connection.
///
/// # Example
///
/// ```ignore
/// use live_voice::{SessionConfig, VoiceSession};
///
/// let controller = VoiceSession::builder()
///     .config(SessionConfig::from_env())
///     .system_instruction("You are a friendly assistant.")
///     .on_event(|e| tracing::warn!(?e, "session event"))
///     .build()?;
///
/// controller.open().await?;
/// ```
///
/// [`VoiceSession::builder()`]: crate::VoiceSession::builder
#[must_use]
pub struct VoiceSessionBuilder {
    config: SessionConfig,
    input: Option<Arc<dyn InputDevice>>,
    output: Option<Arc<dyn OutputDevice>>,
    connector: Option<Arc<dyn Connector>>,
    event_callback: Option<EventCallback>,
}

impl Default for VoiceSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSessionBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            input: None,
            output: None,
            connector: None,
            event_callback: None,
        }
    }

    /// Replaces the whole session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the API key sent with the connection.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config = self.config.with_api_key(key);
        self
    }

    /// Sets the model the remote service should run.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config = self.config.with_model(model);
        self
    }

    /// Sets the system instruction sent during setup.
    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config = self.config.with_system_instruction(instruction);
        self
    }

    /// Uses `device` as the microphone.
    ///
    /// # Example
    ///
    /// ```ignore
    /// VoiceSession::builder()
    ///     .input(CpalInput::by_name("MacBook Pro Microphone"))
    ///     // ...
    /// ```
    pub fn input<D: InputDevice + 'static>(mut self, device: D) -> Self {
        self.input = Some(Arc::new(device));
        self
    }

    /// Uses `device` as the speaker.
    pub fn output<D: OutputDevice + 'static>(mut self, device: D) -> Self {
        self.output = Some(Arc::new(device));
        self
    }

    /// Uses `connector` to reach the remote service.
    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include send backpressure, decode failures, barge-ins and
    /// state changes. The callback runs on session tasks; keep it short.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Validates the configuration and creates an idle controller.
    ///
    /// Nothing is opened until [`SessionController::open()`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<SessionController, VoiceError> {
        self.config.validate()?;

        let backends = Backends {
            input: self
                .input
                .unwrap_or_else(|| Arc::new(CpalInput::default_device())),
            output: self
                .output
                .unwrap_or_else(|| Arc::new(CpalOutput::default_device())),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(WebSocketConnector)),
        };
        tracing::debug!(config = ?self.config, "voice session configured");

        Ok(SessionController::new(
            self.config,
            backends,
            self.event_callback,
        ))
    }
}

/// Main entry point for live-voice.
///
/// Use [`VoiceSession::builder()`] to start configuring a session.
pub struct VoiceSession;

impl VoiceSession {
    /// Creates a new builder for configuring a voice session.
    pub fn builder() -> VoiceSessionBuilder {
        VoiceSessionBuilder::new()
    }
}
