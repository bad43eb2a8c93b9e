//! Voice session orchestration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::capture::{CaptureConfig, CaptureHandle, CapturePipeline, InputDevice, LevelMeter};
use crate::device::FaultNotifier;
use crate::event::{emit, EventCallback, SessionEvent};
use crate::playback::{OutputDevice, PlaybackHandle, PlaybackScheduler};
use crate::state::StateCell;
use crate::transport::{
    Connector, EventStream, InboundEvent, SendOutcome, SessionTransport, TransportConfig,
    TransportHandle,
};
use crate::{AudioFormat, AudioFrame, ErrorKind, OutboundPacket, SessionConfig, SessionState, VoiceError};

/// Statistics about the current (or last) session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Captured frames handed to the transport.
    pub frames_sent: u64,
    /// Outbound packets dropped under backpressure.
    pub packets_dropped: u64,
    /// Inbound chunks scheduled for playback.
    pub chunks_played: u64,
    /// Inbound chunks skipped because they could not be decoded.
    pub decode_failures: u64,
    /// Barge-ins that cut playback.
    pub interruptions: u64,
    /// Response turns completed by the remote party.
    pub turns_completed: u64,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    packets_dropped: AtomicU64,
    chunks_played: AtomicU64,
    decode_failures: AtomicU64,
    interruptions: AtomicU64,
    turns_completed: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.packets_dropped,
            &self.chunks_played,
            &self.decode_failures,
            &self.interruptions,
            &self.turns_completed,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            packets_dropped: self.packets_dropped.load(Ordering::SeqCst),
            chunks_played: self.chunks_played.load(Ordering::SeqCst),
            decode_failures: self.decode_failures.load(Ordering::SeqCst),
            interruptions: self.interruptions.load(Ordering::SeqCst),
            turns_completed: self.turns_completed.load(Ordering::SeqCst),
        }
    }
}

/// Why a session has to end without the user asking.
#[derive(Debug)]
enum Fault {
    Device { origin: &'static str, reason: String },
    Transport(ErrorKind),
    RemoteClosed,
}

/// Everything acquired for one open session.
struct ActiveSession {
    capture: Arc<CaptureHandle>,
    transport: Arc<TransportHandle>,
    playback: Arc<PlaybackHandle>,
    pumps: Vec<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Releases every resource exactly once: pumps, capture, playback, then
    /// the transport. Both devices stop before anything awaits the network.
    async fn release(mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        // The supervisor may be the caller; it ends on its own once every
        // fault sender is gone.
        drop(self.supervisor.take());

        self.capture.close();
        self.playback.close();
        self.transport.close().await;
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

pub(crate) struct Backends {
    pub input: Arc<dyn InputDevice>,
    pub output: Arc<dyn OutputDevice>,
    pub connector: Arc<dyn Connector>,
}

struct Inner {
    config: SessionConfig,
    backends: Backends,
    state: StateCell,
    level: LevelMeter,
    events: Option<EventCallback>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    counters: Arc<Counters>,
}

/// Orchestrates capture, transport and playback for one voice conversation.
///
/// The controller is the only owner of session resources. Whatever ends a
/// session (explicit close, remote close, device or network error), every
/// device handle, the connection and all scheduled playback are released
/// exactly once, and the state reaches `Closed` or `Failed`.
///
/// Cloning is cheap; clones control the same session.
///
/// # Example
///
/// ```ignore
/// let controller = VoiceSession::builder()
///     .config(SessionConfig::from_env())
///     .on_event(|e| tracing::warn!(?e, "session event"))
///     .build()?;
///
/// controller.open().await?;
/// let mut state = controller.watch_state();
/// state.changed().await?;
/// controller.close().await;
/// ```
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub(crate) fn new(
        config: SessionConfig,
        backends: Backends,
        events: Option<EventCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                backends,
                state: StateCell::new(),
                level: LevelMeter::new(),
                events,
                active: tokio::sync::Mutex::new(None),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// Connects and starts audio in both directions.
    ///
    /// Order: connect, then open playback, then capture. If any step fails,
    /// whatever was acquired is released and the state becomes
    /// `Failed(kind)`.
    ///
    /// # Errors
    ///
    /// - [`VoiceError::InvalidState`] unless the session is `Idle`
    /// - [`VoiceError::ConnectFailed`] if the remote service is unreachable
    /// - [`VoiceError::DeviceUnavailable`] if a device cannot be opened
    /// - [`VoiceError::Cancelled`] if `close()` was called meanwhile
    pub async fn open(&self) -> Result<(), VoiceError> {
        let inner = &self.inner;
        if let Err(state) = inner.set_state(|s| *s == SessionState::Idle, SessionState::Connecting) {
            return Err(VoiceError::InvalidState {
                operation: "open",
                state,
            });
        }

        let mut active = inner.active.lock().await;
        inner.counters.reset();

        match Inner::start(inner).await {
            Ok(session) => {
                let opened = inner.set_state(
                    |s| *s == SessionState::Connecting,
                    SessionState::Open { muted: false },
                );
                match opened {
                    Ok(_) => {
                        *active = Some(session);
                        Ok(())
                    }
                    Err(state) => {
                        session.release().await;
                        Err(match state {
                            SessionState::Failed(kind) => VoiceError::Transport(format!(
                                "session failed while opening: {kind}"
                            )),
                            _ => VoiceError::Cancelled,
                        })
                    }
                }
            }
            Err(VoiceError::Cancelled) => Err(VoiceError::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, "failed to open session");
                let _ = inner.set_state(
                    |s| *s == SessionState::Connecting,
                    SessionState::Failed(e.kind()),
                );
                Err(e)
            }
        }
    }

    /// Ends the session and releases everything it holds.
    ///
    /// Idempotent and safe to call concurrently: the first call tears down,
    /// the others return once teardown has finished. A `Failed` session stays
    /// `Failed`; anything else ends `Closed`. There is no graceful drain.
    pub async fn close(&self) {
        let inner = &self.inner;
        let began = inner
            .set_state(
                |s| matches!(s, SessionState::Idle | SessionState::Connecting | SessionState::Open { .. }),
                SessionState::Closing,
            )
            .is_ok();

        // Waits for an in-flight open() or teardown to finish.
        let mut active = inner.active.lock().await;
        if let Some(session) = active.take() {
            session.release().await;
        }
        if began {
            inner.level.publish(0.0);
            let _ = inner.set_state(|s| *s == SessionState::Closing, SessionState::Closed);
        }
    }

    /// Flips microphone muting and returns the new muted flag.
    ///
    /// Muted frames are dropped, not buffered; the device stays open.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::InvalidState`] unless the session is open.
    pub async fn toggle_mute(&self) -> Result<bool, VoiceError> {
        let muted = match self.inner.state.get() {
            SessionState::Open { muted } => !muted,
            state => {
                return Err(VoiceError::InvalidState {
                    operation: "toggle mute",
                    state,
                })
            }
        };
        self.set_muted(muted).await?;
        Ok(muted)
    }

    /// Sets microphone muting.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::InvalidState`] unless the session is open.
    pub async fn set_muted(&self, muted: bool) -> Result<(), VoiceError> {
        let inner = &self.inner;
        let active = inner.active.lock().await;
        let capture = active.as_ref().map(|session| Arc::clone(&session.capture));
        let result = inner.set_state(SessionState::is_open, SessionState::Open { muted });
        match (capture, result) {
            (Some(capture), Ok(_)) => {
                capture.set_muted(muted);
                if muted {
                    inner.level.publish(0.0);
                }
                Ok(())
            }
            (_, Err(state)) | (None, Ok(state)) => Err(VoiceError::InvalidState {
                operation: "change mute",
                state,
            }),
        }
    }

    /// Starts a fresh session after the previous one closed or failed.
    ///
    /// Goes `Closed`/`Failed` → `Idle` → `Connecting`. Never happens
    /// automatically.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::InvalidState`] unless the session is `Closed` or
    /// `Failed`, and otherwise the same errors as [`open()`](Self::open).
    pub async fn reconnect(&self) -> Result<(), VoiceError> {
        // Let any teardown still holding resources finish first.
        drop(self.inner.active.lock().await);
        if let Err(state) = self.inner.set_state(SessionState::is_terminal, SessionState::Idle) {
            return Err(VoiceError::InvalidState {
                operation: "reconnect",
                state,
            });
        }
        tracing::info!("reconnecting");
        self.open().await
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Subscribes to state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Subscribes to the microphone level, normalized to `[0.0, 1.0]`.
    ///
    /// Reads 0.0 while muted or closed.
    pub fn watch_level(&self) -> watch::Receiver<f32> {
        self.inner.level.subscribe()
    }

    /// The message to show the user if the session failed.
    pub fn error_message(&self) -> Option<&'static str> {
        match self.state() {
            SessionState::Failed(kind) => Some(kind.user_message()),
            _ => None,
        }
    }

    /// Returns statistics for the current or most recent session.
    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl Inner {
    /// State transition that also reports `StateChanged` to the event callback.
    fn set_state(
        &self,
        predicate: impl FnOnce(&SessionState) -> bool,
        next: SessionState,
    ) -> Result<SessionState, SessionState> {
        let previous = self.state.transition_if(predicate, next)?;
        if previous != next {
            emit(
                self.events.as_ref(),
                SessionEvent::StateChanged {
                    from: previous,
                    to: next,
                },
            );
        }
        Ok(previous)
    }

    /// Acquires transport, playback and capture and starts the pumps.
    async fn start(self: &Arc<Self>) -> Result<ActiveSession, VoiceError> {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let state_rx = self.state.subscribe();

        let connect = SessionTransport::connect(
            self.backends.connector.as_ref(),
            TransportConfig::from(&self.config),
            self.events.clone(),
        );
        let transport = tokio::select! {
            result = connect => result?,
            () = left_connecting(state_rx) => return Err(VoiceError::Cancelled),
        };

        let playback = match PlaybackScheduler::open(
            self.backends.output.as_ref(),
            self.config.output_format,
            fault_notifier("output", &fault_tx),
        ) {
            Ok(playback) => playback,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let capture = match CapturePipeline::open(
            self.backends.input.as_ref(),
            self.config.input_format,
            &CaptureConfig::from(&self.config),
            Some(self.level.clone()),
            fault_notifier("input", &fault_tx),
        ) {
            Ok(capture) => capture,
            Err(e) => {
                playback.close();
                transport.close().await;
                return Err(e);
            }
        };

        let (Some(frames), Some(events)) = (capture.frames(), transport.events()) else {
            capture.close();
            playback.close();
            transport.close().await;
            return Err(VoiceError::Protocol("session streams already taken".into()));
        };

        let capture = Arc::new(capture);
        let transport = Arc::new(transport);
        let playback = Arc::new(playback);

        let pumps = vec![
            tokio::spawn(run_capture_pump(
                frames,
                Arc::clone(&transport),
                Arc::clone(&self.counters),
            )),
            tokio::spawn(run_event_pump(
                events,
                Arc::clone(&playback),
                fault_tx,
                Arc::clone(&self.counters),
                self.events.clone(),
            )),
        ];
        let supervisor = tokio::spawn(supervise(fault_rx, Arc::downgrade(self)));

        Ok(ActiveSession {
            capture,
            transport,
            playback,
            pumps,
            supervisor: Some(supervisor),
        })
    }

    /// Fatal error path: `Failed(kind)`, then the same teardown as `close()`.
    async fn fail(&self, kind: ErrorKind) {
        if self
            .set_state(
                |s| s.is_open() || *s == SessionState::Connecting,
                SessionState::Failed(kind),
            )
            .is_err()
        {
            // A close or an earlier fault got there first.
            return;
        }
        tracing::error!(%kind, message = kind.user_message(), "session failed");

        let mut active = self.active.lock().await;
        if let Some(session) = active.take() {
            session.release().await;
        }
        self.level.publish(0.0);
    }

    /// The remote side hung up: tear down and end `Closed`.
    async fn remote_closed(&self) {
        if self
            .set_state(SessionState::is_open, SessionState::Closing)
            .is_err()
        {
            return;
        }
        let mut active = self.active.lock().await;
        if let Some(session) = active.take() {
            session.release().await;
        }
        self.level.publish(0.0);
        let _ = self.set_state(|s| *s == SessionState::Closing, SessionState::Closed);
    }
}

/// Resolves once the state is no longer `Connecting`.
async fn left_connecting(mut state_rx: watch::Receiver<SessionState>) {
    let _ = state_rx
        .wait_for(|state| *state != SessionState::Connecting)
        .await;
}

fn fault_notifier(origin: &'static str, faults: &mpsc::UnboundedSender<Fault>) -> FaultNotifier {
    let faults = faults.clone();
    Arc::new(move |reason| {
        tracing::error!(device = origin, %reason, "audio device fault");
        let _ = faults.send(Fault::Device { origin, reason });
    })
}

/// Frames → transport, in capture order.
async fn run_capture_pump(
    mut frames: mpsc::Receiver<AudioFrame>,
    transport: Arc<TransportHandle>,
    counters: Arc<Counters>,
) {
    while let Some(frame) = frames.recv().await {
        match transport.send(OutboundPacket::encode(frame)).await {
            SendOutcome::Queued => {
                let sent = Counters::bump(&counters.frames_sent);
                if sent % 100 == 0 {
                    tracing::debug!(sent, "capture pump progress");
                }
            }
            SendOutcome::Dropped => {
                Counters::bump(&counters.packets_dropped);
            }
            SendOutcome::Closed => break,
        }
    }
    tracing::debug!("capture pump stopped");
}

/// Transport events → playback, in arrival order.
async fn run_event_pump(
    mut events: EventStream,
    playback: Arc<PlaybackHandle>,
    faults: mpsc::UnboundedSender<Fault>,
    counters: Arc<Counters>,
    callback: Option<EventCallback>,
) {
    while let Some(event) = events.recv().await {
        match event {
            InboundEvent::AudioChunk {
                data,
                sample_rate,
                channels,
            } => match playback.enqueue_encoded(&data, AudioFormat::new(sample_rate, channels)) {
                Ok(Some(_)) => {
                    Counters::bump(&counters.chunks_played);
                }
                Ok(None) => {}
                Err(e) => {
                    let failures = Counters::bump(&counters.decode_failures);
                    emit(
                        callback.as_ref(),
                        SessionEvent::DecodeFailed {
                            reason: e.to_string(),
                            failures,
                        },
                    );
                }
            },
            InboundEvent::Interrupted => {
                let discarded_buffers = playback.interrupt();
                Counters::bump(&counters.interruptions);
                emit(
                    callback.as_ref(),
                    SessionEvent::Interrupted { discarded_buffers },
                );
            }
            InboundEvent::TurnComplete => {
                Counters::bump(&counters.turns_completed);
                emit(callback.as_ref(), SessionEvent::TurnComplete);
            }
            InboundEvent::Opened => tracing::debug!("session opened by remote"),
            InboundEvent::Closed => {
                let _ = faults.send(Fault::RemoteClosed);
                break;
            }
            InboundEvent::Error(kind) => {
                let _ = faults.send(Fault::Transport(kind));
                break;
            }
        }
    }
    tracing::debug!("event pump stopped");
}

/// Waits for the first fault and turns it into a teardown. Later faults are
/// ignored: the first error wins.
async fn supervise(mut faults: mpsc::UnboundedReceiver<Fault>, inner: Weak<Inner>) {
    let Some(fault) = faults.recv().await else {
        return;
    };
    let Some(inner) = inner.upgrade() else {
        return;
    };
    tracing::debug!(?fault, "session fault");
    match fault {
        Fault::Device { .. } => inner.fail(ErrorKind::DeviceUnavailable).await,
        Fault::Transport(kind) => inner.fail(kind).await,
        Fault::RemoteClosed => inner.remote_closed().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::capture::MockInput;
    use crate::playback::MockOutput;
    use crate::transport::{MemoryConnector, MemoryServer};

    struct Rig {
        controller: SessionController,
        mic: MockInput,
        speaker: MockOutput,
        connector: MemoryConnector,
        server: MemoryServer,
    }

    fn rig() -> Rig {
        let mic = MockInput::new(AudioFormat::INPUT);
        let speaker = MockOutput::new(AudioFormat::OUTPUT);
        let (connector, server) = MemoryConnector::new(64);
        let controller = SessionController::new(
            SessionConfig::default().with_frame_duration(Duration::from_millis(20)),
            Backends {
                input: Arc::new(mic.clone()),
                output: Arc::new(speaker.clone()),
                connector: Arc::new(connector.clone()),
            },
            None,
        );
        Rig {
            controller,
            mic,
            speaker,
            connector,
            server,
        }
    }

    async fn wait_for_state(controller: &SessionController, wanted: SessionState) {
        let mut rx = controller.watch_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == wanted))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_open_reaches_listening() {
        let mut rig = rig();
        rig.controller.open().await.unwrap();
        let _remote = rig.server.accept().await.unwrap();

        assert_eq!(rig.controller.state(), SessionState::Open { muted: false });
        assert_eq!(rig.controller.state().label(), "listening");
        assert_eq!(rig.mic.open_count(), 1);
        assert_eq!(rig.speaker.open_count(), 1);
    }

    #[tokio::test]
    async fn test_open_twice_is_invalid() {
        let mut rig = rig();
        rig.controller.open().await.unwrap();
        let _remote = rig.server.accept().await.unwrap();

        let err = rig.controller.open().await.unwrap_err();
        assert!(matches!(
            err,
            VoiceError::InvalidState {
                operation: "open",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_toggle_mute_updates_state() {
        let mut rig = rig();
        rig.controller.open().await.unwrap();
        let _remote = rig.server.accept().await.unwrap();

        assert!(rig.controller.toggle_mute().await.unwrap());
        assert_eq!(rig.controller.state().label(), "muted");
        assert!(!rig.controller.toggle_mute().await.unwrap());
        assert_eq!(rig.controller.state(), SessionState::Open { muted: false });
    }

    #[tokio::test]
    async fn test_toggle_mute_requires_open() {
        let rig = rig();
        assert!(matches!(
            rig.controller.toggle_mute().await,
            Err(VoiceError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_from_idle() {
        let rig = rig();
        rig.controller.close().await;
        assert_eq!(rig.controller.state(), SessionState::Closed);
        assert_eq!(rig.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_playback_failure_releases_transport() {
        let (connector, mut server) = MemoryConnector::new(8);
        let mic = MockInput::new(AudioFormat::INPUT);
        let controller = SessionController::new(
            SessionConfig::default(),
            Backends {
                input: Arc::new(mic.clone()),
                output: Arc::new(MockOutput::unavailable()),
                connector: Arc::new(connector),
            },
            None,
        );

        let err = controller.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert_eq!(
            controller.state(),
            SessionState::Failed(ErrorKind::DeviceUnavailable)
        );
        assert!(controller.error_message().is_some());
        assert_eq!(mic.open_count(), 0);

        let mut remote = server.accept().await.unwrap();
        assert!(remote.wait_closed().await);
    }

    #[tokio::test]
    async fn test_capture_failure_releases_playback_and_transport() {
        let (connector, mut server) = MemoryConnector::new(8);
        let speaker = MockOutput::new(AudioFormat::OUTPUT);
        let controller = SessionController::new(
            SessionConfig::default(),
            Backends {
                input: Arc::new(MockInput::unavailable()),
                output: Arc::new(speaker.clone()),
                connector: Arc::new(connector),
            },
            None,
        );

        assert!(controller.open().await.is_err());
        assert_eq!(speaker.open_count(), 1);
        assert_eq!(speaker.release_count(), 1);
        let mut remote = server.accept().await.unwrap();
        assert!(remote.wait_closed().await);
    }

    #[tokio::test]
    async fn test_device_fault_fails_session() {
        let mut rig = rig();
        rig.controller.open().await.unwrap();
        let _remote = rig.server.accept().await.unwrap();

        rig.mic.fail("unplugged");
        wait_for_state(
            &rig.controller,
            SessionState::Failed(ErrorKind::DeviceUnavailable),
        )
        .await;

        // Teardown finishes under the session lock; close() waits for it.
        rig.controller.close().await;
        assert_eq!(rig.mic.release_count(), 1);
        assert_eq!(rig.speaker.release_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_close_ends_closed() {
        let mut rig = rig();
        rig.controller.open().await.unwrap();
        let remote = rig.server.accept().await.unwrap();

        remote.close();
        wait_for_state(&rig.controller, SessionState::Closed).await;
        rig.controller.close().await;
        assert_eq!(rig.mic.release_count(), 1);
        assert_eq!(rig.speaker.release_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_failure() {
        let mut rig = rig();
        rig.controller.open().await.unwrap();
        let remote = rig.server.accept().await.unwrap();
        remote.fail("reset by peer");
        wait_for_state(
            &rig.controller,
            SessionState::Failed(ErrorKind::Transport),
        )
        .await;

        rig.controller.reconnect().await.unwrap();
        let _remote = rig.server.accept().await.unwrap();
        assert!(rig.controller.state().is_open());
        assert_eq!(rig.connector.connect_count(), 2);
        assert_eq!(rig.mic.open_count(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_requires_terminal_state() {
        let rig = rig();
        assert!(matches!(
            rig.controller.reconnect().await,
            Err(VoiceError::InvalidState {
                operation: "reconnect",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_close_during_connect_cancels_open() {
        let (connector, mut server) = MemoryConnector::new(8);
        let connector = connector.with_manual_setup();
        let speaker = MockOutput::new(AudioFormat::OUTPUT);
        let controller = SessionController::new(
            SessionConfig::default(),
            Backends {
                input: Arc::new(MockInput::new(AudioFormat::INPUT)),
                output: Arc::new(speaker.clone()),
                connector: Arc::new(connector),
            },
            None,
        );

        let opening = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.open().await })
        };
        // The remote never acknowledges setup, so open() is stuck connecting.
        let _remote = server.accept().await.unwrap();
        wait_for_state(&controller, SessionState::Connecting).await;

        controller.close().await;
        assert!(matches!(opening.await.unwrap(), Err(VoiceError::Cancelled)));
        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(speaker.open_count(), 0);
    }
}
