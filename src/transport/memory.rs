//! In-memory wire for testing without a network.
//!
//! [`MemoryConnector`] hands out connections whose far ends show up on a
//! [`MemoryServer`] as [`RemoteEnd`]s. A remote end plays the service: it
//! reads what the client sent and scripts what the client receives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::mpsc;

use crate::format::{decode_pcm16le, encode_pcm16le};
use crate::transport::protocol::ClientMessage;
use crate::transport::{Connector, WireMessage, WireSink, WireSource};
use crate::{AudioFormat, VoiceError};

type ServerFrame = Result<WireMessage, VoiceError>;

/// A [`Connector`] backed by channels.
///
/// # Example
///
/// ```
/// use live_voice::transport::MemoryConnector;
///
/// let (connector, server) = MemoryConnector::new(16);
/// assert_eq!(connector.connect_count(), 0);
/// # drop(server);
/// ```
#[derive(Clone)]
pub struct MemoryConnector {
    capacity: usize,
    refuse: Option<String>,
    manual_setup: bool,
    accept_tx: Option<mpsc::UnboundedSender<RemoteEnd>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Creates a connector whose client-to-server wire holds `capacity`
    /// messages before `send` has to wait.
    ///
    /// The setup acknowledgement is sent automatically on connect.
    pub fn new(capacity: usize) -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            capacity: capacity.max(1),
            refuse: None,
            manual_setup: false,
            accept_tx: Some(accept_tx),
            connects: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryServer { accept_rx })
    }

    /// Creates a connector that fails every connection attempt.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            capacity: 1,
            refuse: Some(reason.into()),
            manual_setup: false,
            accept_tx: None,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Leaves the setup acknowledgement to the remote end.
    #[must_use]
    pub fn with_manual_setup(mut self) -> Self {
        self.manual_setup = true;
        self
    }

    /// Number of connection attempts so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn WireSink>, Box<dyn WireSource>), VoiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.refuse {
            return Err(VoiceError::Transport(reason.clone()));
        }

        let (client_tx, client_rx) = mpsc::channel(self.capacity);
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));

        let remote = RemoteEnd {
            url: url.to_string(),
            from_client: client_rx,
            to_client: server_tx,
            closes: Arc::clone(&closes),
        };
        if !self.manual_setup {
            remote.send_text(r#"{"setupComplete":{}}"#);
        }
        if let Some(accept_tx) = &self.accept_tx {
            let _ = accept_tx.send(remote);
        }

        Ok((
            Box::new(MemorySink {
                tx: Some(client_tx),
                closes,
            }),
            Box::new(MemorySource { rx: server_rx }),
        ))
    }
}

/// Receives the remote ends of connections made through a [`MemoryConnector`].
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<RemoteEnd>,
}

impl MemoryServer {
    /// Waits for the next connection.
    pub async fn accept(&mut self) -> Option<RemoteEnd> {
        self.accept_rx.recv().await
    }

    /// Returns the next connection if one was made.
    pub fn try_accept(&mut self) -> Option<RemoteEnd> {
        self.accept_rx.try_recv().ok()
    }
}

/// The service side of one in-memory connection.
///
/// Dropping it looks like the service hanging up.
pub struct RemoteEnd {
    url: String,
    from_client: mpsc::Receiver<WireMessage>,
    to_client: mpsc::UnboundedSender<ServerFrame>,
    closes: Arc<AtomicUsize>,
}

impl RemoteEnd {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next raw message from the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        match self.from_client.recv().await {
            Some(WireMessage::Close) | None => None,
            Some(message) => Some(message),
        }
    }

    /// Next client message that parses as JSON.
    pub async fn recv_client_message(&mut self) -> Option<ClientMessage> {
        loop {
            let parsed = match self.recv().await? {
                WireMessage::Text(text) => serde_json::from_str(&text),
                WireMessage::Binary(bytes) => serde_json::from_slice(&bytes),
                WireMessage::Close => return None,
            };
            match parsed {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!(error = %e, "remote end skipped unparseable message"),
            }
        }
    }

    /// Samples of the next `realtimeInput` message, skipping anything else.
    pub async fn recv_audio(&mut self) -> Option<Vec<i16>> {
        loop {
            if let ClientMessage::RealtimeInput(input) = self.recv_client_message().await? {
                let mut samples = Vec::new();
                for chunk in input.media_chunks {
                    let bytes = BASE64.decode(chunk.data).ok()?;
                    samples.extend(decode_pcm16le(&bytes).ok()?);
                }
                return Some(samples);
            }
        }
    }

    /// Waits until the client's side is gone. Returns `true` if it was
    /// closed properly rather than dropped.
    pub async fn wait_closed(&mut self) -> bool {
        while self.recv().await.is_some() {}
        self.closes.load(Ordering::SeqCst) > 0
    }

    /// Number of times the client closed this connection.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Sends a raw text frame.
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(Ok(WireMessage::Text(text.to_string())));
    }

    /// Sends the setup acknowledgement.
    pub fn send_setup_complete(&self) {
        self.send_text(r#"{"setupComplete":{}}"#);
    }

    /// Sends one response audio chunk.
    pub fn send_audio(&self, samples: &[i16], format: AudioFormat) {
        let message = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{
                        "inlineData": {
                            "mimeType": format.pcm_mime_type(),
                            "data": BASE64.encode(encode_pcm16le(samples)),
                        }
                    }]
                }
            }
        });
        self.send_text(&message.to_string());
    }

    /// Signals that the user barged in.
    pub fn send_interrupted(&self) {
        self.send_text(r#"{"serverContent":{"interrupted":true}}"#);
    }

    /// Signals the end of a response turn.
    pub fn send_turn_complete(&self) {
        self.send_text(r#"{"serverContent":{"turnComplete":true}}"#);
    }

    /// Closes the connection from the service side.
    pub fn close(&self) {
        let _ = self.to_client.send(Ok(WireMessage::Close));
    }

    /// Breaks the connection with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.send(Err(VoiceError::Transport(reason.to_string())));
    }
}

struct MemorySink {
    tx: Option<mpsc::Sender<WireMessage>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl WireSink for MemorySink {
    async fn send(&mut self, message: WireMessage) -> Result<(), VoiceError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| VoiceError::Transport("connection closed".into()))?;
        tx.send(message)
            .await
            .map_err(|_| VoiceError::Transport("remote hung up".into()))
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        if self.tx.take().is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl WireSource for MemorySource {
    async fn next(&mut self) -> Option<Result<WireMessage, VoiceError>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_delivers_remote_end() {
        let (connector, mut server) = MemoryConnector::new(4);
        let (mut sink, mut source) = connector.connect("mem://a").await.unwrap();
        let mut remote = server.accept().await.unwrap();
        assert_eq!(remote.url(), "mem://a");

        // Automatic setup acknowledgement arrives first.
        assert_eq!(
            source.next().await.unwrap().unwrap(),
            WireMessage::Text(r#"{"setupComplete":{}}"#.into())
        );

        sink.send(WireMessage::Text("hello".into())).await.unwrap();
        assert_eq!(remote.recv().await, Some(WireMessage::Text("hello".into())));
    }

    #[tokio::test]
    async fn test_close_is_counted_once() {
        let (connector, mut server) = MemoryConnector::new(4);
        let (mut sink, _source) = connector.connect("mem://a").await.unwrap();
        let mut remote = server.accept().await.unwrap();

        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(remote.wait_closed().await);
        assert_eq!(remote.close_count(), 1);
        assert!(sink.send(WireMessage::Close).await.is_err());
    }

    #[tokio::test]
    async fn test_refusing_connector() {
        let connector = MemoryConnector::refusing("nope");
        assert!(connector.connect("mem://a").await.is_err());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_remote_ends_source() {
        let (connector, mut server) = MemoryConnector::new(4);
        let connector = connector.with_manual_setup();
        let (_sink, mut source) = connector.connect("mem://a").await.unwrap();
        drop(server.accept().await);
        assert!(source.next().await.is_none());
    }
}
