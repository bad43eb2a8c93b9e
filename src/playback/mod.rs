//! Playback scheduler: decoded response audio → speaker, gapless and
//! interruptible.
//!
//! ```text
//! enqueue ──▶ Timeline (arena + next_free) ◀── render ◀── Device Thread
//!                 ▲
//! interrupt ──────┘  clears arena, next_free = now
//! ```
//!
//! Buffers are placed at `max(now, next_free)` in output frames, so
//! consecutive buffers chain with no gap and no overlap.

mod arena;
pub mod decode;
mod device;
mod mock;
mod timeline;

pub use arena::BufferId;
pub use device::{list_output_devices, CpalOutput};
pub use mock::MockOutput;
pub use timeline::{ScheduledBuffer, Timeline, TimelineStats};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::device::{DeviceStream, FaultNotifier};
use crate::{AudioFormat, VoiceError};

/// A speaker-like sink that pulls audio from a [`Timeline`] on its own clock.
pub trait OutputDevice: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> String;

    /// The format the device plays in.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] if the device cannot be used.
    fn native_format(&self) -> Result<AudioFormat, VoiceError>;

    /// Starts pulling frames from `timeline`.
    ///
    /// `on_fault` is called if the device dies while running.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] if the stream cannot start.
    fn start(
        &self,
        timeline: Arc<Timeline>,
        on_fault: FaultNotifier,
    ) -> Result<Box<dyn DeviceStream>, VoiceError>;
}

/// Playback statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Buffers scheduled.
    pub buffers_scheduled: u64,
    /// Buffers that played to the end.
    pub buffers_completed: u64,
    /// Buffers stopped by interruption or close.
    pub buffers_discarded: u64,
    /// Inbound chunks that could not be decoded.
    pub decode_failures: u64,
    /// Frames of silence rendered because nothing was scheduled.
    pub underrun_frames: u64,
}

/// Entry point for opening playback.
pub struct PlaybackScheduler;

impl PlaybackScheduler {
    /// Opens `device`. Inbound audio is expected in `source` format unless a
    /// chunk says otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] if the device cannot be opened.
    pub fn open(
        device: &dyn OutputDevice,
        source: AudioFormat,
        on_fault: FaultNotifier,
    ) -> Result<PlaybackHandle, VoiceError> {
        let device_format = device.native_format()?;
        let timeline = Arc::new(Timeline::new(device_format));
        let stream = device.start(Arc::clone(&timeline), on_fault)?;

        tracing::info!(
            device = %device.name(),
            "playback opened: source={}Hz/{}ch, device={}Hz/{}ch",
            source.sample_rate,
            source.channels,
            device_format.sample_rate,
            device_format.channels
        );

        Ok(PlaybackHandle {
            device_name: device.name(),
            source_format: source,
            timeline,
            stream: Mutex::new(Some(stream)),
            decode_failures: AtomicU64::new(0),
        })
    }
}

/// Handle to an open output device and its timeline.
///
/// Dropping the handle closes it.
pub struct PlaybackHandle {
    device_name: String,
    source_format: AudioFormat,
    timeline: Arc<Timeline>,
    stream: Mutex<Option<Box<dyn DeviceStream>>>,
    decode_failures: AtomicU64,
}

impl PlaybackHandle {
    /// Schedules decoded mono samples at the device rate.
    ///
    /// Never blocks. Returns `None` for an empty buffer or after `close()`.
    pub fn enqueue(&self, samples: Vec<f32>) -> Option<ScheduledBuffer> {
        self.timeline.enqueue(samples)
    }

    /// Decodes a base64 PCM16LE chunk and schedules it.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Decode`] if the chunk cannot be decoded. The
    /// failure is counted and nothing is scheduled; playback carries on.
    pub fn enqueue_encoded(
        &self,
        data: &str,
        format: AudioFormat,
    ) -> Result<Option<ScheduledBuffer>, VoiceError> {
        match decode::decode_chunk(data, format, self.timeline.format().sample_rate) {
            Ok(samples) => Ok(self.enqueue(samples)),
            Err(e) => {
                let failures = self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(error = %e, failures, "skipping undecodable audio chunk");
                Err(e)
            }
        }
    }

    /// Stops every scheduled buffer and re-anchors at the current clock.
    ///
    /// Safe to call concurrently with `enqueue`: a buffer is either stopped
    /// by this call or scheduled after it, never both.
    pub fn interrupt(&self) -> usize {
        let discarded = self.timeline.interrupt();
        tracing::info!(discarded, "playback interrupted");
        discarded
    }

    /// Format inbound audio is assumed to be in.
    pub fn source_format(&self) -> AudioFormat {
        self.source_format
    }

    /// Format the device plays in.
    pub fn device_format(&self) -> AudioFormat {
        self.timeline.format()
    }

    /// Device clock as elapsed playback time.
    pub fn now(&self) -> Duration {
        self.device_format().duration_of(self.timeline.now())
    }

    /// Buffers scheduled or playing.
    pub fn pending(&self) -> usize {
        self.timeline.pending()
    }

    /// Current statistics.
    pub fn stats(&self) -> PlaybackStats {
        let timeline = self.timeline.stats();
        PlaybackStats {
            buffers_scheduled: timeline.scheduled,
            buffers_completed: timeline.completed,
            buffers_discarded: timeline.discarded,
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            underrun_frames: timeline.underrun_frames,
        }
    }

    /// Stops all buffers and releases the device.
    ///
    /// Idempotent; the device is released exactly once.
    pub fn close(&self) {
        let stream = self.stream.lock().take();
        if let Some(mut stream) = stream {
            let discarded = self.timeline.close();
            stream.release();
            tracing::info!(device = %self.device_name, discarded, "playback closed");
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.close();
    }
}
