//! Capture bridge task: reads the ring buffer, converts format, frames, forwards.
//!
//! The bridge is the only consumer of the device ring buffer. It:
//! - drains whatever the device callback has pushed since the last poll
//! - converts from the device's native format to the target format
//! - cuts fixed-size, sequenced frames
//! - drops frames while muted (no backlog), publishes levels, and forwards
//!   the rest without ever awaiting the downstream consumer

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::capture::framer::Framer;
use crate::capture::{CaptureShared, LevelMeter};
use crate::format::FormatConverter;
use crate::{AudioFormat, AudioFrame};

/// Everything the bridge needs, bundled to keep `new` readable.
pub(crate) struct BridgeParts {
    pub consumer: ringbuf::HeapCons<i16>,
    pub native_format: AudioFormat,
    pub target_format: AudioFormat,
    pub frame_duration: Duration,
    pub frame_tx: mpsc::Sender<AudioFrame>,
    pub shared: Arc<CaptureShared>,
    pub level: Option<LevelMeter>,
}

pub(crate) struct CaptureBridge {
    consumer: ringbuf::HeapCons<i16>,
    converter: FormatConverter,
    framer: Framer,
    frame_tx: mpsc::Sender<AudioFrame>,
    shared: Arc<CaptureShared>,
    level: Option<LevelMeter>,
    poll_interval: Duration,
    device_channels: usize,
    scratch: Vec<i16>,
}

impl CaptureBridge {
    pub fn new(parts: BridgeParts) -> Self {
        tracing::info!(
            "CaptureBridge creating: device={}Hz/{}ch, target={}Hz/{}ch, frame={:?}",
            parts.native_format.sample_rate,
            parts.native_format.channels,
            parts.target_format.sample_rate,
            parts.target_format.channels,
            parts.frame_duration
        );

        let frame_frames = parts.target_format.frames_for(parts.frame_duration);

        Self {
            consumer: parts.consumer,
            converter: FormatConverter::new(parts.native_format, parts.target_format),
            framer: Framer::new(parts.target_format, frame_frames),
            frame_tx: parts.frame_tx,
            shared: parts.shared,
            level: parts.level,
            // Poll at half the frame duration for responsiveness
            poll_interval: (parts.frame_duration / 2).max(Duration::from_millis(1)),
            device_channels: parts.native_format.channels.max(1) as usize,
            scratch: Vec::new(),
        }
    }

    /// Runs until the handle is closed or the frame receiver is dropped.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.shared.running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !self.poll() {
                break;
            }
        }
        tracing::debug!(
            next_sequence = self.framer.next_sequence(),
            "CaptureBridge stopped"
        );
    }

    /// Processes everything currently in the ring buffer.
    ///
    /// Returns `false` once the downstream receiver is gone.
    fn poll(&mut self) -> bool {
        let available = self.consumer.occupied_len();
        let aligned = available - available % self.device_channels;
        if aligned == 0 {
            return !self.frame_tx.is_closed();
        }

        self.scratch.resize(aligned, 0);
        let read = self.consumer.pop_slice(&mut self.scratch[..aligned]);
        let converted = self.converter.convert(&self.scratch[..read]);

        for frame in self.framer.push(&converted) {
            if !self.forward(frame) {
                return false;
            }
        }
        true
    }

    fn forward(&self, frame: AudioFrame) -> bool {
        if self.shared.muted.load(Ordering::SeqCst) {
            // Dropped, not buffered: unmuting resumes with fresh audio.
            self.shared.frames_muted.fetch_add(1, Ordering::Relaxed);
            self.publish_level(0.0);
            return true;
        }

        self.publish_level(frame.level());
        let sequence = frame.sequence();
        match self.frame_tx.try_send(frame) {
            Ok(()) => {
                let emitted = self.shared.frames_emitted.fetch_add(1, Ordering::Relaxed);
                if emitted % 50 == 0 {
                    tracing::debug!("CaptureBridge: emitted frame #{}", sequence);
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                let overflowed = self.shared.frames_overflowed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    sequence,
                    overflowed,
                    "frame consumer is behind; dropping captured frame"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn publish_level(&self, level: f32) {
        if let Some(meter) = &self.level {
            meter.publish(level);
        }
    }
}
