//! Mock output device for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::device::{DeviceStream, FaultNotifier};
use crate::playback::{OutputDevice, Timeline};
use crate::{AudioFormat, VoiceError};

#[derive(Default)]
struct MockOutputShared {
    timeline: Mutex<Option<Arc<Timeline>>>,
    fault: Mutex<Option<FaultNotifier>>,
    opens: AtomicUsize,
    releases: AtomicUsize,
}

/// A speaker that only plays when told to.
///
/// Nothing renders on its own: tests pull frames with
/// [`render`](MockOutput::render), which advances the playback clock exactly
/// as a device callback would. Releasing the same stream twice panics.
#[derive(Clone)]
pub struct MockOutput {
    format: AudioFormat,
    unavailable: bool,
    shared: Arc<MockOutputShared>,
}

impl MockOutput {
    /// Creates a working mock device with the given native format.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            unavailable: false,
            shared: Arc::default(),
        }
    }

    /// Creates a mock device that refuses to open.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(AudioFormat::OUTPUT)
        }
    }

    /// Renders `frames` frames. Returns an empty vector if the device is not
    /// open.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let Some(timeline) = self.shared.timeline.lock().clone() else {
            return Vec::new();
        };
        let mut out = vec![0.0; frames * self.format.channels.max(1) as usize];
        timeline.render(&mut out);
        out
    }

    /// Renders `duration` worth of frames.
    pub fn render_for(&self, duration: Duration) -> Vec<f32> {
        self.render(self.format.frames_for(duration))
    }

    /// Simulates the device disappearing mid-stream.
    pub fn fail(&self, reason: &str) {
        if let Some(notify) = self.shared.fault.lock().as_ref() {
            notify(reason.to_string());
        }
    }

    /// Returns `true` while a stream is open.
    pub fn is_open(&self) -> bool {
        self.shared.timeline.lock().is_some()
    }

    /// Number of times the device was opened.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of times a stream was released.
    pub fn release_count(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }
}

impl OutputDevice for MockOutput {
    fn name(&self) -> String {
        "mock output".to_string()
    }

    fn native_format(&self) -> Result<AudioFormat, VoiceError> {
        if self.unavailable {
            return Err(VoiceError::device_unavailable(self.name(), "no output device"));
        }
        Ok(self.format)
    }

    fn start(
        &self,
        timeline: Arc<Timeline>,
        on_fault: FaultNotifier,
    ) -> Result<Box<dyn DeviceStream>, VoiceError> {
        if self.unavailable {
            return Err(VoiceError::device_unavailable(self.name(), "no output device"));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        *self.shared.timeline.lock() = Some(timeline);
        *self.shared.fault.lock() = Some(on_fault);
        Ok(Box::new(MockOutputStream {
            shared: Arc::clone(&self.shared),
            released: AtomicBool::new(false),
        }))
    }
}

struct MockOutputStream {
    shared: Arc<MockOutputShared>,
    released: AtomicBool,
}

impl DeviceStream for MockOutputStream {
    fn release(&mut self) {
        assert!(
            !self.released.swap(true, Ordering::SeqCst),
            "mock output released twice"
        );
        self.shared.timeline.lock().take();
        self.shared.fault.lock().take();
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_fault() -> FaultNotifier {
        Arc::new(|_| {})
    }

    #[test]
    fn test_render_pulls_from_timeline() {
        let speaker = MockOutput::new(AudioFormat::new(1000, 1));
        let timeline = Arc::new(Timeline::new(AudioFormat::new(1000, 1)));
        let _stream = speaker.start(Arc::clone(&timeline), noop_fault()).unwrap();

        timeline.enqueue(vec![0.5; 5]);
        assert_eq!(speaker.render(6), vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.0]);
        assert_eq!(timeline.now(), 6);
    }

    #[test]
    fn test_render_when_closed_is_empty() {
        let speaker = MockOutput::new(AudioFormat::OUTPUT);
        assert!(speaker.render(10).is_empty());
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let speaker = MockOutput::new(AudioFormat::OUTPUT);
        let timeline = Arc::new(Timeline::new(AudioFormat::OUTPUT));
        let mut stream = speaker.start(timeline, noop_fault()).unwrap();
        stream.release();
        stream.release();
    }
}
