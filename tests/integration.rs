//! Integration tests for live-voice.
//!
//! Everything here runs against the mock devices and the in-memory wire.
//! Tests that require actual audio hardware or network access are marked
//! with `#[ignore]` and should be run manually.

use std::sync::Arc;
use std::time::Duration;

use live_voice::capture::MockInput;
use live_voice::device::log_faults;
use live_voice::playback::{MockOutput, PlaybackScheduler};
use live_voice::transport::{MemoryConnector, MemoryServer, SendOutcome, SessionTransport, TransportConfig};
use live_voice::{
    AudioFormat, AudioFrame, ErrorKind, OutboundPacket, SessionConfig, SessionController,
    SessionEvent, SessionState, VoiceError, VoiceSession,
};
use parking_lot::Mutex;

/// 20ms of 24kHz mono.
const BUFFER_FRAMES: usize = 480;

/// 20ms of 16kHz mono.
const FRAME_SAMPLES: usize = 320;

fn packet(sequence: u64) -> OutboundPacket {
    OutboundPacket::encode(AudioFrame::new(
        sequence,
        vec![sequence as i16; 4],
        Duration::ZERO,
        AudioFormat::INPUT,
    ))
}

struct Harness {
    controller: SessionController,
    mic: MockInput,
    speaker: MockOutput,
    server: MemoryServer,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

fn harness() -> Harness {
    let mic = MockInput::new(AudioFormat::INPUT);
    let speaker = MockOutput::new(AudioFormat::OUTPUT);
    let (connector, server) = MemoryConnector::new(64);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let controller = VoiceSession::builder()
        .config(
            SessionConfig::default()
                .with_endpoint("mem://integration")
                .with_frame_duration(Duration::from_millis(20)),
        )
        .input(mic.clone())
        .output(speaker.clone())
        .connector(connector)
        .on_event(move |event| sink.lock().push(event))
        .build()
        .unwrap();

    Harness {
        controller,
        mic,
        speaker,
        server,
        events,
    }
}

/// Polls `condition` until it holds or two seconds pass.
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test]
fn test_consecutive_buffers_play_back_to_back() {
    let speaker = MockOutput::new(AudioFormat::OUTPUT);
    let playback = PlaybackScheduler::open(&speaker, AudioFormat::OUTPUT, log_faults("speaker")).unwrap();

    // Let the clock run a little so the first buffer does not start at zero.
    speaker.render(100);
    let t = playback.now();

    let buffers: Vec<_> = (0..3)
        .map(|_| playback.enqueue(vec![0.25; BUFFER_FRAMES]).unwrap())
        .collect();

    let format = playback.device_format();
    for (i, buffer) in buffers.iter().enumerate() {
        assert_eq!(
            format.duration_of(buffer.start),
            t + Duration::from_millis(20 * i as u64)
        );
    }
    assert_eq!(buffers[1].start, buffers[0].end());
    assert_eq!(buffers[2].start, buffers[1].end());

    let out = speaker.render(3 * BUFFER_FRAMES + 10);
    assert!(out[..3 * BUFFER_FRAMES].iter().all(|&s| s == 0.25));
    assert!(out[3 * BUFFER_FRAMES..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_interrupt_before_second_buffer_plays_only_first() {
    let speaker = MockOutput::new(AudioFormat::OUTPUT);
    let playback = PlaybackScheduler::open(&speaker, AudioFormat::OUTPUT, log_faults("speaker")).unwrap();

    playback.enqueue(vec![0.1; BUFFER_FRAMES]).unwrap();
    let second = playback.enqueue(vec![0.2; BUFFER_FRAMES]).unwrap();

    let first_out = speaker.render(BUFFER_FRAMES);
    assert!(first_out.iter().all(|&s| s == 0.1));

    assert_eq!(playback.interrupt(), 1);
    let rest = speaker.render(2 * BUFFER_FRAMES);
    assert!(rest.iter().all(|&s| s == 0.0), "second buffer must never play");

    // New audio starts from the current clock, not after the discarded buffer.
    let next = playback.enqueue(vec![0.3; BUFFER_FRAMES]).unwrap();
    assert_eq!(next.start, 3 * BUFFER_FRAMES as u64);
    assert!(next.start > second.start);
}

#[tokio::test]
async fn test_refused_connection_fails_without_touching_devices() {
    let mic = MockInput::new(AudioFormat::INPUT);
    let speaker = MockOutput::new(AudioFormat::OUTPUT);
    let controller = VoiceSession::builder()
        .input(mic.clone())
        .output(speaker.clone())
        .connector(MemoryConnector::refusing("network unreachable"))
        .build()
        .unwrap();

    let err = controller.open().await.unwrap_err();
    assert!(matches!(err, VoiceError::ConnectFailed { .. }));
    assert_eq!(
        controller.state(),
        SessionState::Failed(ErrorKind::ConnectFailed)
    );
    assert_eq!(controller.state().label(), "error");
    assert_eq!(mic.open_count(), 0);
    assert_eq!(speaker.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_drops_one_packet_and_keeps_order() {
    // One slot on the wire, taken by the setup message until the remote reads.
    let (connector, mut server) = MemoryConnector::new(1);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let config = SessionConfig::default()
        .with_endpoint("mem://integration")
        .with_outbound_capacity(2)
        .with_send_timeout(Duration::from_millis(20));
    let transport = SessionTransport::connect(
        &connector,
        TransportConfig::from(&config),
        Some(live_voice::event_callback(move |event| sink.lock().push(event))),
    )
    .await
    .unwrap();
    let mut remote = server.accept().await.unwrap();

    // p1 sits in the writer, p2 and p3 fill the outbound queue, p4 waits
    // out the send timeout.
    let mut outcomes = Vec::new();
    for sequence in 1..=4 {
        outcomes.push(transport.send(packet(sequence)).await);
    }
    assert_eq!(
        outcomes,
        vec![
            SendOutcome::Queued,
            SendOutcome::Queued,
            SendOutcome::Queued,
            SendOutcome::Dropped
        ]
    );
    assert_eq!(
        events.lock().as_slice(),
        &[SessionEvent::Degraded {
            sequence: 4,
            waited_ms: 20,
            dropped_total: 1
        }]
    );

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(remote.recv_audio().await.unwrap()[0]);
    }
    assert_eq!(transport.send(packet(5)).await, SendOutcome::Queued);
    received.push(remote.recv_audio().await.unwrap()[0]);

    assert_eq!(received, vec![1, 2, 3, 5]);
    assert_eq!(transport.stats().packets_dropped, 1);
    transport.close().await;
}

#[tokio::test]
async fn test_full_conversation_with_barge_in() {
    let mut h = harness();
    h.controller.open().await.unwrap();
    let mut remote = h.server.accept().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Open { muted: false });

    // Microphone → remote.
    h.mic.push(&[1000; FRAME_SAMPLES * 3]);
    for _ in 0..3 {
        let samples = remote.recv_audio().await.unwrap();
        assert_eq!(samples.len(), FRAME_SAMPLES);
        assert!(samples.iter().all(|&s| s == 1000));
    }
    eventually("frames sent", || h.controller.stats().frames_sent == 3).await;

    // Remote → speaker.
    remote.send_audio(&[8192; BUFFER_FRAMES], AudioFormat::OUTPUT);
    remote.send_audio(&[8192; BUFFER_FRAMES], AudioFormat::OUTPUT);
    eventually("chunks scheduled", || h.controller.stats().chunks_played == 2).await;
    let out = h.speaker.render(BUFFER_FRAMES);
    assert!(out.iter().all(|&s| s == 0.25));

    // Barge-in stops the rest.
    remote.send_interrupted();
    eventually("interruption", || h.controller.stats().interruptions == 1).await;
    assert!(h.speaker.render(BUFFER_FRAMES).iter().all(|&s| s == 0.0));
    assert!(h
        .events
        .lock()
        .contains(&SessionEvent::Interrupted { discarded_buffers: 1 }));

    remote.send_turn_complete();
    eventually("turn complete", || h.controller.stats().turns_completed == 1).await;

    h.controller.close().await;
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert_eq!(h.mic.release_count(), 1);
    assert_eq!(h.speaker.release_count(), 1);
    assert!(remote.wait_closed().await);
}

#[tokio::test]
async fn test_undecodable_chunk_is_skipped() {
    let mut h = harness();
    h.controller.open().await.unwrap();
    let remote = h.server.accept().await.unwrap();

    remote.send_text(
        r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"@@not base64@@"}}]}}}"#,
    );
    remote.send_audio(&[8192; BUFFER_FRAMES], AudioFormat::OUTPUT);

    eventually("good chunk scheduled", || h.controller.stats().chunks_played == 1).await;
    assert_eq!(h.controller.stats().decode_failures, 1);
    assert!(h
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, SessionEvent::DecodeFailed { failures: 1, .. })));
    assert!(h.controller.state().is_open());
    h.controller.close().await;
}

#[tokio::test]
async fn test_muted_frames_never_reach_the_remote() {
    let mut h = harness();
    h.controller.open().await.unwrap();
    let mut remote = h.server.accept().await.unwrap();

    assert!(h.controller.toggle_mute().await.unwrap());
    assert_eq!(*h.controller.watch_level().borrow(), 0.0);
    h.mic.push(&[500; FRAME_SAMPLES * 2]);
    // Give the capture bridge a few polls to drain the muted audio.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!h.controller.toggle_mute().await.unwrap());
    h.mic.push(&[700; FRAME_SAMPLES]);

    let samples = remote.recv_audio().await.unwrap();
    assert!(samples.iter().all(|&s| s == 700));
    assert_eq!(h.controller.stats().frames_sent, 1);
    h.controller.close().await;
}

#[tokio::test]
async fn test_concurrent_close_releases_everything_once() {
    let mut h = harness();
    h.controller.open().await.unwrap();
    let mut remote = h.server.accept().await.unwrap();

    let other = h.controller.clone();
    tokio::join!(h.controller.close(), other.close());
    h.controller.close().await;

    assert_eq!(h.controller.state(), SessionState::Closed);
    assert_eq!(h.mic.release_count(), 1);
    assert_eq!(h.speaker.release_count(), 1);
    assert!(remote.wait_closed().await);
    assert_eq!(remote.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_on_a_stalled_wire_silences_playback_within_a_frame() {
    let mic = MockInput::new(AudioFormat::INPUT);
    let speaker = MockOutput::new(AudioFormat::OUTPUT);
    // The remote never reads, so the setup message keeps the only wire slot.
    let (connector, mut server) = MemoryConnector::new(1);
    let frame = Duration::from_millis(20);
    let controller = VoiceSession::builder()
        .config(
            SessionConfig::default()
                .with_endpoint("mem://integration")
                .with_frame_duration(frame),
        )
        .input(mic.clone())
        .output(speaker.clone())
        .connector(connector)
        .build()
        .unwrap();

    controller.open().await.unwrap();
    let remote = server.accept().await.unwrap();

    mic.push(&[1000; FRAME_SAMPLES * 3]);
    eventually("writer blocked on the wire", || controller.stats().frames_sent >= 1).await;

    remote.send_audio(&[8192; BUFFER_FRAMES], AudioFormat::OUTPUT);
    eventually("chunk scheduled", || controller.stats().chunks_played == 1).await;

    let started = tokio::time::Instant::now();
    controller.close().await;
    assert!(started.elapsed() < frame, "close took {:?}", started.elapsed());

    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(speaker.release_count(), 1);
    assert!(speaker.render(BUFFER_FRAMES).is_empty());
    assert_eq!(mic.release_count(), 1);
    assert_eq!(remote.close_count(), 1);
}

#[tokio::test]
async fn test_state_changes_are_observable_in_order() {
    let mut h = harness();
    h.controller.open().await.unwrap();
    let _remote = h.server.accept().await.unwrap();
    h.controller.close().await;

    let states: Vec<_> = h
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Open { muted: false },
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
}

#[tokio::test]
async fn test_remote_error_fails_session_and_allows_reconnect() {
    let mut h = harness();
    h.controller.open().await.unwrap();
    let remote = h.server.accept().await.unwrap();

    remote.fail("connection reset");
    eventually("failed state", || {
        h.controller.state() == SessionState::Failed(ErrorKind::Transport)
    })
    .await;
    assert!(h.controller.error_message().is_some());
    eventually("devices released", || {
        h.mic.release_count() == 1 && h.speaker.release_count() == 1
    })
    .await;

    h.controller.reconnect().await.unwrap();
    let _remote = h.server.accept().await.unwrap();
    assert!(h.controller.state().is_open());
    assert_eq!(h.mic.open_count(), 2);
    h.controller.close().await;
    assert_eq!(h.mic.release_count(), 2);
}

#[tokio::test]
#[ignore = "requires audio hardware and LIVE_VOICE_API_KEY"]
async fn test_real_session() {
    let controller = VoiceSession::builder()
        .config(SessionConfig::from_env())
        .build()
        .unwrap();
    controller.open().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    controller.close().await;
    assert_eq!(controller.state(), SessionState::Closed);
}
