//! Session transport: one streaming session against the remote service.
//!
//! ```text
//!             ┌──────────────┐   outbound mpsc   ┌────────┐
//! send() ───▶ │ bounded wait │ ────────────────▶ │ writer │ ───▶ WireSink
//!             └──────────────┘                   └────────┘
//!
//!             ┌──────────────┐   InboundQueue    ┌────────┐
//! events() ◀─ │ EventStream  │ ◀──────────────── │ reader │ ◀─── WireSource
//!             └──────────────┘                   └────────┘
//! ```
//!
//! The writer and reader are tokio tasks. `send` never waits longer than
//! the configured send timeout; a packet that does not fit by then is
//! dropped and reported as [`SessionEvent::Degraded`].

mod memory;
pub mod protocol;
mod queue;
mod websocket;
mod wire;

pub use memory::{MemoryConnector, MemoryServer, RemoteEnd};
pub use websocket::WebSocketConnector;
pub use wire::{Connector, WireMessage, WireSink, WireSource};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::event::{emit, EventCallback, SessionEvent};
use crate::transport::queue::InboundQueue;
use crate::{AudioFormat, ErrorKind, OutboundPacket, SessionConfig, VoiceError};

/// How long `close()` waits for the writer task before aborting it.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// How long the writer tries to deliver the close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(10);

/// Events produced by the transport, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Response audio: base64 16-bit little-endian PCM.
    AudioChunk {
        /// Base64 payload, decoded by the playback side.
        data: String,
        /// Sample rate of the payload.
        sample_rate: u32,
        /// Channel count of the payload.
        channels: u16,
    },
    /// The remote party barged in; queued playback must stop.
    Interrupted,
    /// The remote party finished its turn.
    TurnComplete,
    /// The session is established.
    Opened,
    /// The remote side closed the connection.
    Closed,
    /// The connection failed.
    Error(ErrorKind),
}

impl InboundEvent {
    /// Returns `true` for audio chunks, the only events that may be evicted.
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::AudioChunk { .. })
    }
}

/// Lifecycle of a [`TransportHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Exchanging the setup handshake.
    Connecting,
    /// Streaming in both directions.
    Open,
    /// `close()` in progress.
    Closing,
    /// Connection released.
    Closed,
    /// The connection failed while open.
    Failed(ErrorKind),
}

/// Result of [`TransportHandle::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The packet is queued and will go out in order.
    Queued,
    /// Backpressure outlasted the send timeout; the packet was dropped.
    Dropped,
    /// The transport is closed or failed.
    Closed,
}

/// Transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Packets accepted by `send`.
    pub packets_queued: u64,
    /// Packets dropped under backpressure.
    pub packets_dropped: u64,
    /// Inbound audio chunks evicted from a full event queue.
    pub chunks_evicted: u64,
}

/// Settings for one transport connection.
#[derive(Clone)]
pub struct TransportConfig {
    /// Full URL, including credentials.
    pub url: String,
    /// Endpoint without credentials, used in errors and logs.
    pub endpoint: String,
    /// Model name for the setup message.
    pub model: String,
    /// System instruction for the setup message.
    pub system_instruction: Option<String>,
    /// Format assumed for inbound audio that does not state its rate.
    pub output_format: AudioFormat,
    /// Longest wait for outbound queue space.
    pub send_timeout: Duration,
    /// Outbound queue capacity.
    pub outbound_capacity: usize,
    /// Inbound queue capacity.
    pub inbound_capacity: usize,
    /// Deadline for connect plus setup.
    pub connect_timeout: Duration,
}

impl From<&SessionConfig> for TransportConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            url: config.url(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
            output_format: config.output_format,
            send_timeout: config.send_timeout,
            outbound_capacity: config.outbound_capacity,
            inbound_capacity: config.inbound_capacity,
            connect_timeout: config.connect_timeout,
        }
    }
}

/// State shared between the handle and its tasks.
struct Shared {
    state: Mutex<TransportState>,
    queue: Arc<InboundQueue>,
    shutdown: watch::Sender<bool>,
    events: Option<EventCallback>,
    packets_queued: AtomicU64,
    packets_dropped: AtomicU64,
}

impl Shared {
    fn push(&self, event: InboundEvent) {
        if let Some(dropped_chunks) = self.queue.push(event) {
            tracing::warn!(dropped_chunks, "inbound queue full; evicted oldest audio chunk");
            emit(
                self.events.as_ref(),
                SessionEvent::InboundOverflow { dropped_chunks },
            );
        }
    }

    /// Marks the connection failed and tells the consumer. No-op unless open.
    fn fail(&self, kind: ErrorKind) {
        {
            let mut state = self.state.lock();
            if *state != TransportState::Open {
                return;
            }
            *state = TransportState::Failed(kind);
        }
        self.shutdown.send_replace(true);
        self.push(InboundEvent::Error(kind));
        self.queue.close();
    }

    /// Records a remote close. No-op unless open.
    fn remote_closed(&self) {
        {
            let mut state = self.state.lock();
            if *state != TransportState::Open {
                return;
            }
            *state = TransportState::Closed;
        }
        tracing::info!("remote closed the session");
        self.shutdown.send_replace(true);
        self.push(InboundEvent::Closed);
        self.queue.close();
    }
}

/// Ordered, non-restartable stream of [`InboundEvent`]s.
pub struct EventStream {
    queue: Arc<InboundQueue>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once the transport is closed
    /// and every queued event has been delivered.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.queue.recv().await
    }

    /// Returns the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.queue.try_recv()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no events are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entry point for connecting a transport.
pub struct SessionTransport;

impl SessionTransport {
    /// Connects, sends the setup message and waits for the acknowledgement.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::ConnectFailed`] if the connection, the setup
    /// exchange or the deadline fails.
    pub async fn connect(
        connector: &dyn Connector,
        config: TransportConfig,
        events: Option<EventCallback>,
    ) -> Result<TransportHandle, VoiceError> {
        tracing::info!(endpoint = %config.endpoint, model = %config.model, "connecting");

        let handshake = handshake(connector, &config);
        let (sink, source) = match tokio::time::timeout(config.connect_timeout, handshake).await {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                tracing::error!(endpoint = %config.endpoint, error = %e, "connect failed");
                return Err(VoiceError::connect_failed(&config.endpoint, e));
            }
            Err(_) => {
                tracing::error!(endpoint = %config.endpoint, "connect timed out");
                return Err(VoiceError::connect_failed(
                    &config.endpoint,
                    format!("no setup acknowledgement within {:?}", config.connect_timeout),
                ));
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = Arc::new(InboundQueue::new(config.inbound_capacity));
        let shared = Arc::new(Shared {
            state: Mutex::new(TransportState::Open),
            queue: Arc::clone(&queue),
            shutdown: shutdown_tx,
            events,
            packets_queued: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
        });
        shared.push(InboundEvent::Opened);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        let writer = tokio::spawn(run_writer(
            sink,
            outbound_rx,
            shutdown_rx,
            Arc::clone(&shared),
        ));
        let reader = tokio::spawn(run_reader(source, Arc::clone(&shared), config.output_format));

        tracing::info!(endpoint = %config.endpoint, "session transport open");

        Ok(TransportHandle {
            outbound_tx,
            shared,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            stream: Mutex::new(Some(EventStream { queue })),
            closing: AtomicBool::new(false),
            send_timeout: config.send_timeout,
        })
    }
}

async fn handshake(
    connector: &dyn Connector,
    config: &TransportConfig,
) -> Result<(Box<dyn WireSink>, Box<dyn WireSource>), VoiceError> {
    let (mut sink, mut source) = connector.connect(&config.url).await?;

    let setup = protocol::setup_message(&config.model, config.system_instruction.as_deref())?;
    sink.send(WireMessage::Text(setup)).await?;

    loop {
        match source.next().await {
            Some(Ok(WireMessage::Close)) | None => {
                return Err(VoiceError::Transport(
                    "connection closed during setup".into(),
                ));
            }
            Some(Ok(message)) => match protocol::parse_server_message(&message) {
                Ok(Some(parsed)) if parsed.is_setup_complete() => return Ok((sink, source)),
                Ok(_) => tracing::debug!("ignoring message before setup acknowledgement"),
                Err(e) => tracing::warn!(error = %e, "skipping malformed message during setup"),
            },
            Some(Err(e)) => return Err(e),
        }
    }
}

async fn run_writer(
    mut sink: Box<dyn WireSink>,
    mut outbound_rx: mpsc::Receiver<OutboundPacket>,
    mut shutdown_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown_requested(&mut shutdown_rx) => break,
            packet = outbound_rx.recv() => {
                let Some(packet) = packet else { break };
                let message = match protocol::realtime_input_message(&packet) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(sequence = packet.sequence(), error = %e, "could not encode packet");
                        continue;
                    }
                };
                // A send blocked on a backpressured wire must not hold up shutdown.
                tokio::select! {
                    biased;
                    () = shutdown_requested(&mut shutdown_rx) => {
                        tracing::debug!(sequence = packet.sequence(), "shutdown while send pending");
                        break;
                    }
                    result = sink.send(WireMessage::Text(message)) => {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "send failed");
                            shared.fail(ErrorKind::Transport);
                            break;
                        }
                    }
                }
            }
        }
    }
    match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "error closing connection"),
        Err(_) => tracing::debug!("close frame not flushed in time; dropping connection"),
    }
    tracing::debug!("transport writer stopped");
}

/// Resolves once shutdown has been signalled or the signal is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|&stop| stop).await;
}

async fn run_reader(mut source: Box<dyn WireSource>, shared: Arc<Shared>, output_format: AudioFormat) {
    loop {
        match source.next().await {
            Some(Ok(WireMessage::Close)) | None => {
                shared.remote_closed();
                break;
            }
            Some(Ok(message)) => match protocol::parse_server_message(&message) {
                Ok(Some(parsed)) => {
                    if parsed.go_away.is_some() {
                        tracing::warn!("server announced it will disconnect");
                    }
                    for event in parsed.into_events(output_format) {
                        // Opened was already pushed after the handshake.
                        if event != InboundEvent::Opened {
                            shared.push(event);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "skipping malformed server message"),
            },
            Some(Err(e)) => {
                tracing::error!(error = %e, "connection error");
                shared.fail(ErrorKind::Transport);
                break;
            }
        }
    }
    tracing::debug!("transport reader stopped");
}

/// Handle to an open transport.
///
/// Dropping the handle aborts its tasks; call [`close()`](Self::close) for an
/// orderly shutdown.
pub struct TransportHandle {
    outbound_tx: mpsc::Sender<OutboundPacket>,
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    stream: Mutex<Option<EventStream>>,
    closing: AtomicBool,
    send_timeout: Duration,
}

impl TransportHandle {
    /// Queues a packet, waiting at most the send timeout for space.
    ///
    /// Packets are written in submission order. A dropped packet leaves a
    /// gap; later packets still go out in order.
    pub async fn send(&self, packet: OutboundPacket) -> SendOutcome {
        use mpsc::error::TrySendError;

        if self.closing.load(Ordering::SeqCst) || self.state() != TransportState::Open {
            return SendOutcome::Closed;
        }
        let sequence = packet.sequence();

        let packet = match self.outbound_tx.try_send(packet) {
            Ok(()) => return self.queued(),
            Err(TrySendError::Closed(_)) => return SendOutcome::Closed,
            Err(TrySendError::Full(packet)) => packet,
        };

        match tokio::time::timeout(self.send_timeout, self.outbound_tx.send(packet)).await {
            Ok(Ok(())) => self.queued(),
            Ok(Err(_)) => SendOutcome::Closed,
            Err(_) => {
                let dropped_total = self.shared.packets_dropped.fetch_add(1, Ordering::SeqCst) + 1;
                let waited_ms = u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    sequence,
                    waited_ms,
                    dropped_total,
                    "connection backpressured; dropping outbound packet"
                );
                emit(
                    self.shared.events.as_ref(),
                    SessionEvent::Degraded {
                        sequence,
                        waited_ms,
                        dropped_total,
                    },
                );
                SendOutcome::Dropped
            }
        }
    }

    fn queued(&self) -> SendOutcome {
        self.shared.packets_queued.fetch_add(1, Ordering::Relaxed);
        SendOutcome::Queued
    }

    /// Takes the event stream. Only the first call returns `Some`.
    pub fn events(&self) -> Option<EventStream> {
        self.stream.lock().take()
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        *self.shared.state.lock()
    }

    /// Current counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            packets_queued: self.shared.packets_queued.load(Ordering::SeqCst),
            packets_dropped: self.shared.packets_dropped.load(Ordering::SeqCst),
            chunks_evicted: self.shared.queue.evicted_audio(),
        }
    }

    /// Closes the connection.
    ///
    /// Idempotent. Pending outbound packets are discarded. Ends in `Closed`,
    /// unless the connection had already failed, in which case it stays
    /// `Failed`.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, TransportState::Open | TransportState::Connecting) {
                *state = TransportState::Closing;
            }
        }

        self.shared.shutdown.send_replace(true);
        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            if tokio::time::timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await.is_err() {
                tracing::warn!("writer did not stop in time; aborting");
                writer.abort();
            }
        }
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.shared.queue.close();

        {
            let mut state = self.shared.state.lock();
            if !matches!(*state, TransportState::Failed(_)) {
                *state = TransportState::Closed;
            }
        }
        tracing::info!("session transport closed");
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.lock().take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.shared.queue.close();
    }
}
