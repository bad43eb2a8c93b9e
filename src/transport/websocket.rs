//! WebSocket wire built on tokio-tungstenite.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::transport::{Connector, WireMessage, WireSink, WireSource};
use crate::VoiceError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over `ws://` or `wss://` (rustls with bundled web roots).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn WireSink>, Box<dyn WireSource>), VoiceError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");

        let (sink, source) = stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { source })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl WireSink for WsSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), VoiceError> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(bytes) => Message::Binary(bytes),
            WireMessage::Close => Message::Close(None),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(VoiceError::Transport(e.to_string())),
        }
    }
}

struct WsSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl WireSource for WsSource {
    async fn next(&mut self) -> Option<Result<WireMessage, VoiceError>> {
        loop {
            let message = match self.source.next().await? {
                Ok(message) => message,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(VoiceError::Transport(e.to_string()))),
            };
            return Some(Ok(match message {
                Message::Text(text) => WireMessage::Text(text),
                Message::Binary(bytes) => WireMessage::Binary(bytes),
                Message::Close(frame) => {
                    if let Some(frame) = frame {
                        tracing::info!(code = %frame.code, reason = %frame.reason, "server closed websocket");
                    }
                    WireMessage::Close
                }
                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }));
        }
    }
}
