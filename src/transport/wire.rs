//! Message-level connection abstraction.
//!
//! The transport speaks to the remote service through these traits so the
//! WebSocket can be swapped for an in-memory wire in tests.

use async_trait::async_trait;

use crate::VoiceError;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
    /// The peer closed the connection.
    Close,
}

/// Sending half of a connection.
#[async_trait]
pub trait WireSink: Send {
    /// Sends one message, waiting while the connection is backpressured.
    async fn send(&mut self, message: WireMessage) -> Result<(), VoiceError>;

    /// Closes the connection. Idempotent.
    async fn close(&mut self) -> Result<(), VoiceError>;
}

/// Receiving half of a connection.
#[async_trait]
pub trait WireSource: Send {
    /// Next message, `None` once the connection is gone.
    async fn next(&mut self) -> Option<Result<WireMessage, VoiceError>>;
}

/// Opens connections to the remote service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `url` and returns both halves of the connection.
    async fn connect(&self, url: &str)
        -> Result<(Box<dyn WireSink>, Box<dyn WireSource>), VoiceError>;
}
