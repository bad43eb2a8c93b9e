//! Capture pipeline: microphone → fixed-size, sequenced [`AudioFrame`]s.
//!
//! ```text
//! Device Thread → Ring Buffer → Capture Bridge → frame channel
//! ```
//!
//! The device callback only ever pushes into a lock-free ring buffer, so a
//! slow consumer can never stall the audio thread. The bridge task converts
//! and frames the audio and hands frames off with `try_send`.

mod bridge;
mod device;
mod framer;
mod mock;

pub use device::{list_input_devices, CpalInput};
pub use mock::MockInput;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::traits::Split;
use ringbuf::HeapRb;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::capture::bridge::{BridgeParts, CaptureBridge};
use crate::device::{DeviceStream, FaultNotifier};
use crate::{AudioFormat, AudioFrame, SessionConfig, VoiceError};

/// A microphone-like source of interleaved i16 samples.
///
/// Implementations push samples into the provided ring buffer producer from
/// their own thread and must never block doing so.
pub trait InputDevice: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> String;

    /// The format the device captures in.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] if the device cannot be used.
    fn native_format(&self) -> Result<AudioFormat, VoiceError>;

    /// Starts capturing into `producer`.
    ///
    /// `on_fault` is called if the device dies while running.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] if the stream cannot start.
    fn start(
        &self,
        producer: ringbuf::HeapProd<i16>,
        on_fault: FaultNotifier,
    ) -> Result<Box<dyn DeviceStream>, VoiceError>;
}

/// Publishes the most recent input level without ever blocking.
#[derive(Clone)]
pub struct LevelMeter {
    tx: Arc<watch::Sender<f32>>,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMeter {
    /// Creates a meter reading 0.0.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0.0);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribes to level updates.
    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.tx.subscribe()
    }

    /// Latest published level.
    pub fn current(&self) -> f32 {
        *self.tx.borrow()
    }

    pub(crate) fn publish(&self, level: f32) {
        self.tx.send_replace(level);
    }
}

/// Configuration for the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Duration of each frame.
    pub frame_duration: Duration,
    /// Capacity of the device ring buffer, as a duration.
    pub ring_buffer_duration: Duration,
    /// Capacity of the frame channel.
    pub frame_queue: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for CaptureConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            frame_duration: config.frame_duration,
            ring_buffer_duration: config.ring_buffer_duration,
            frame_queue: config.outbound_capacity,
        }
    }
}

/// Counters shared between a [`CaptureHandle`] and its bridge task.
pub(crate) struct CaptureShared {
    pub muted: AtomicBool,
    pub running: AtomicBool,
    pub frames_emitted: AtomicU64,
    pub frames_muted: AtomicU64,
    pub frames_overflowed: AtomicU64,
}

impl CaptureShared {
    fn new() -> Self {
        Self {
            muted: AtomicBool::new(false),
            running: AtomicBool::new(true),
            frames_emitted: AtomicU64::new(0),
            frames_muted: AtomicU64::new(0),
            frames_overflowed: AtomicU64::new(0),
        }
    }
}

/// Capture statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames handed to the consumer.
    pub frames_emitted: u64,
    /// Frames dropped because capture was muted.
    pub frames_muted: u64,
    /// Frames dropped because the consumer was behind.
    pub frames_overflowed: u64,
}

/// Entry point for opening capture.
pub struct CapturePipeline;

impl CapturePipeline {
    /// Opens `device` and starts producing frames in `target` format.
    ///
    /// Must be called from within a tokio runtime. Failure is fatal for this
    /// attempt; the pipeline never retries.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DeviceUnavailable`] if the device cannot be opened.
    pub fn open(
        device: &dyn InputDevice,
        target: AudioFormat,
        config: &CaptureConfig,
        level: Option<LevelMeter>,
        on_fault: FaultNotifier,
    ) -> Result<CaptureHandle, VoiceError> {
        let native_format = device.native_format()?;
        let capacity = native_format.samples_for(config.ring_buffer_duration).max(1024);
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();

        let stream = device.start(producer, on_fault)?;

        let shared = Arc::new(CaptureShared::new());
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue.max(1));

        let bridge = CaptureBridge::new(BridgeParts {
            consumer,
            native_format,
            target_format: target,
            frame_duration: config.frame_duration,
            frame_tx,
            shared: Arc::clone(&shared),
            level,
        });
        let task = tokio::spawn(bridge.run());

        tracing::info!(device = %device.name(), "capture opened");

        Ok(CaptureHandle {
            device_name: device.name(),
            format: target,
            stream: Mutex::new(Some(stream)),
            task: Mutex::new(Some(task)),
            frames: Mutex::new(Some(frame_rx)),
            shared,
        })
    }
}

/// Handle to a running capture pipeline.
///
/// Dropping the handle closes it.
pub struct CaptureHandle {
    device_name: String,
    format: AudioFormat,
    stream: Mutex<Option<Box<dyn DeviceStream>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    frames: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
    shared: Arc<CaptureShared>,
}

impl CaptureHandle {
    /// Takes the frame receiver.
    ///
    /// The sequence is not restartable: only the first call returns `Some`.
    /// The receiver ends when the handle is closed.
    pub fn frames(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.lock().take()
    }

    /// Format of emitted frames.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Suppresses frame emission without closing the device.
    pub fn mute(&self) {
        self.set_muted(true);
    }

    /// Resumes frame emission.
    pub fn unmute(&self) {
        self.set_muted(false);
    }

    /// Sets the mute flag.
    pub fn set_muted(&self, muted: bool) {
        if self.shared.muted.swap(muted, Ordering::SeqCst) != muted {
            tracing::info!(device = %self.device_name, muted, "capture mute changed");
        }
    }

    /// Returns `true` while muted.
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Returns `true` until [`close()`](Self::close) is called.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Returns current capture statistics.
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_emitted: self.shared.frames_emitted.load(Ordering::SeqCst),
            frames_muted: self.shared.frames_muted.load(Ordering::SeqCst),
            frames_overflowed: self.shared.frames_overflowed.load(Ordering::SeqCst),
        }
    }

    /// Stops the bridge and releases the device.
    ///
    /// Idempotent; the device is released exactly once. Frames already in
    /// the channel are still delivered, then the receiver ends.
    pub fn close(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if let Some(mut stream) = self.stream.lock().take() {
            stream.release();
            tracing::info!(device = %self.device_name, "capture closed");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}
