//! Configuration types for voice sessions.

use std::fmt;
use std::time::Duration;

use crate::VoiceError;

/// Default streaming endpoint (Gemini Live bidirectional API).
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default conversational model.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "LIVE_VOICE_API_KEY";
/// Environment variable overriding the model name.
pub const ENV_MODEL: &str = "LIVE_VOICE_MODEL";
/// Environment variable overriding the endpoint.
pub const ENV_ENDPOINT: &str = "LIVE_VOICE_ENDPOINT";

/// Sample rate and channel count of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioFormat {
    /// 16kHz mono, the format the remote service expects for microphone audio.
    pub const INPUT: Self = Self::new(16000, 1);

    /// 24kHz mono, the format the remote service streams responses in.
    pub const OUTPUT: Self = Self::new(24000, 1);

    /// Creates a new format.
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of frames (samples per channel) covering `duration`.
    #[must_use]
    pub fn frames_for(&self, duration: Duration) -> usize {
        (f64::from(self.sample_rate) * duration.as_secs_f64()).round() as usize
    }

    /// Number of interleaved samples covering `duration`.
    #[must_use]
    pub fn samples_for(&self, duration: Duration) -> usize {
        self.frames_for(duration) * self.channels as usize
    }

    /// Playback duration of `frames` frames.
    #[must_use]
    pub fn duration_of(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// MIME type used on the wire for 16-bit PCM in this format.
    #[must_use]
    pub fn pcm_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// Configuration for a voice session.
///
/// Use [`SessionConfig::default()`] and the `with_*` setters, or
/// [`SessionConfig::from_env()`].
///
/// # Example
///
/// ```
/// use live_voice::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_api_key("secret")
///     .with_system_instruction("You are a gentle journaling companion.")
///     .with_send_timeout(Duration::from_millis(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the remote service.
    pub endpoint: String,

    /// Model or service name sent in the setup message.
    pub model: String,

    /// System instruction sent in the setup message.
    pub system_instruction: Option<String>,

    /// API key appended to the endpoint as the `key` query parameter.
    pub api_key: Option<String>,

    /// Format of outbound microphone audio.
    /// Default: 16kHz mono
    pub input_format: AudioFormat,

    /// Format of inbound response audio when the server does not say.
    /// Default: 24kHz mono
    pub output_format: AudioFormat,

    /// Duration of each captured frame.
    ///
    /// Smaller values reduce latency but increase per-packet overhead.
    /// Default: 100ms
    pub frame_duration: Duration,

    /// Longest time `send` may wait for queue space before dropping a packet.
    ///
    /// Bounds how long a backpressured connection can stall capture.
    /// Default: 20ms
    pub send_timeout: Duration,

    /// Outbound packet queue capacity.
    /// Default: 32 packets (3.2s of audio at the default frame duration)
    pub outbound_capacity: usize,

    /// Inbound event queue capacity before audio chunks are evicted.
    /// Default: 256 events
    pub inbound_capacity: usize,

    /// Deadline for connecting and completing the setup handshake.
    /// Default: 10s
    pub connect_timeout: Duration,

    /// Size of the ring buffer between the capture device and the framer.
    /// Default: 2s
    pub ring_buffer_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: None,
            api_key: None,
            input_format: AudioFormat::INPUT,
            output_format: AudioFormat::OUTPUT,
            frame_duration: Duration::from_millis(100),
            send_timeout: Duration::from_millis(20),
            outbound_capacity: 32,
            inbound_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            ring_buffer_duration: Duration::from_secs(2),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("system_instruction", &self.system_instruction)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("input_format", &self.input_format)
            .field("output_format", &self.output_format)
            .field("frame_duration", &self.frame_duration)
            .field("send_timeout", &self.send_timeout)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("inbound_capacity", &self.inbound_capacity)
            .field("connect_timeout", &self.connect_timeout)
            .field("ring_buffer_duration", &self.ring_buffer_duration)
            .finish()
    }
}

impl SessionConfig {
    /// Builds a configuration from `LIVE_VOICE_*` environment variables,
    /// falling back to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            config.api_key = Some(key);
        }
        if let Ok(model) = std::env::var(ENV_MODEL) {
            config.model = model;
        }
        if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
            config.endpoint = endpoint;
        }
        config
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the frame duration.
    #[must_use]
    pub fn with_frame_duration(mut self, duration: Duration) -> Self {
        self.frame_duration = duration;
        self
    }

    /// Sets the send backpressure bound.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the outbound queue capacity.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Sets the inbound queue capacity.
    #[must_use]
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Checks that the configuration can be used to open a session.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.endpoint.is_empty() {
            return Err(VoiceError::Config("endpoint is empty".into()));
        }
        if self.model.is_empty() {
            return Err(VoiceError::Config("model is empty".into()));
        }
        for (name, format) in [("input", self.input_format), ("output", self.output_format)] {
            if format.sample_rate == 0 || format.channels == 0 {
                return Err(VoiceError::Config(format!(
                    "{name} format must have a non-zero sample rate and channel count"
                )));
            }
        }
        if self.input_format.frames_for(self.frame_duration) == 0 {
            return Err(VoiceError::Config(format!(
                "frame duration {:?} is shorter than one sample",
                self.frame_duration
            )));
        }
        if self.outbound_capacity == 0 || self.inbound_capacity == 0 {
            return Err(VoiceError::Config("queue capacities must be non-zero".into()));
        }
        if self.ring_buffer_duration < self.frame_duration {
            return Err(VoiceError::Config(
                "ring buffer must hold at least one frame".into(),
            ));
        }
        Ok(())
    }

    /// Endpoint URL including the API key, if any.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let separator = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{separator}key={}", self.endpoint, encode_query_value(key))
            }
            None => self.endpoint.clone(),
        }
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(char::from(byte));
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_presets() {
        assert_eq!(AudioFormat::INPUT, AudioFormat::new(16000, 1));
        assert_eq!(AudioFormat::OUTPUT, AudioFormat::new(24000, 1));
    }

    #[test]
    fn test_frames_for_duration() {
        assert_eq!(AudioFormat::INPUT.frames_for(Duration::from_millis(100)), 1600);
        assert_eq!(
            AudioFormat::new(48000, 2).samples_for(Duration::from_millis(10)),
            960
        );
    }

    #[test]
    fn test_duration_of_frames() {
        assert_eq!(AudioFormat::OUTPUT.duration_of(480), Duration::from_millis(20));
        assert_eq!(AudioFormat::new(0, 1).duration_of(480), Duration::ZERO);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(AudioFormat::INPUT.pcm_mime_type(), "audio/pcm;rate=16000");
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.frame_duration, Duration::from_millis(100));
        assert_eq!(config.send_timeout, Duration::from_millis(20));
        assert_eq!(config.outbound_capacity, 32);
        assert_eq!(config.inbound_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = SessionConfig::default().with_outbound_capacity(0);
        assert!(matches!(config.validate(), Err(VoiceError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_tiny_frames() {
        let config = SessionConfig::default().with_frame_duration(Duration::from_nanos(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_appends_key() {
        let config = SessionConfig::default()
            .with_endpoint("wss://example.test/live")
            .with_api_key("abc");
        assert_eq!(config.url(), "wss://example.test/live?key=abc");

        let config = config.with_endpoint("wss://example.test/live?alt=json");
        assert_eq!(config.url(), "wss://example.test/live?alt=json&key=abc");
    }

    #[test]
    fn test_url_encodes_reserved_key_characters() {
        let config = SessionConfig::default()
            .with_endpoint("wss://example.test/live")
            .with_api_key("a&b#c+d/é");
        assert_eq!(
            config.url(),
            "wss://example.test/live?key=a%26b%23c%2Bd%2F%C3%A9"
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = SessionConfig::default().with_api_key("super-secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
