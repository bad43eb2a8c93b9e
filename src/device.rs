//! Shared plumbing for capture and playback devices.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::StreamTrait;

use crate::VoiceError;

/// Called from a device thread when the device fails mid-stream.
///
/// Must not block: it runs on the audio backend's thread.
pub type FaultNotifier = Arc<dyn Fn(String) + Send + Sync>;

/// Creates a [`FaultNotifier`] that only logs.
pub fn log_faults(device: impl Into<String>) -> FaultNotifier {
    let device = device.into();
    Arc::new(move |reason| {
        tracing::error!(device = %device, %reason, "audio device fault");
    })
}

/// A running device stream.
///
/// Exactly one owner calls [`release()`](DeviceStream::release), exactly once.
pub trait DeviceStream: Send {
    /// Stops the stream and gives the device back to the system.
    fn release(&mut self);
}

/// Runs a CPAL stream on a dedicated thread.
///
/// `cpal::Stream` is not `Send` on every platform, so the stream is built,
/// played and dropped on the same thread. The handle only holds a stop
/// channel and the join handle.
pub(crate) struct StreamThread {
    name: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawns the thread, builds the stream with `build` and starts it.
    ///
    /// Returns once the stream is playing, or with the build error.
    pub fn spawn<F>(name: impl Into<String>, build: F) -> Result<Self, VoiceError>
    where
        F: FnOnce() -> Result<cpal::Stream, VoiceError> + Send + 'static,
    {
        let name = name.into();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), VoiceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("live-voice-{thread_name}"))
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| VoiceError::device_unavailable(&thread_name, e))?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Park until released (or the handle is dropped).
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!(device = %thread_name, "device stream stopped");
            })
            .map_err(|e| VoiceError::device_unavailable(&name, e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name,
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(VoiceError::device_unavailable(
                    name,
                    "stream thread exited before starting",
                ))
            }
        }
    }
}

impl DeviceStream for StreamThread {
    fn release(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(device = %self.name, "device stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.release();
    }
}

/// Maps a CPAL stream error to a fault message, or `None` if it is transient.
pub(crate) fn classify_stream_error(err: &cpal::StreamError) -> Option<String> {
    match err {
        cpal::StreamError::DeviceNotAvailable => Some(err.to_string()),
        _ => None,
    }
}
