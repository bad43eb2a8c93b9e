//! Mock input device for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::Producer;

use crate::capture::InputDevice;
use crate::device::{DeviceStream, FaultNotifier};
use crate::{AudioFormat, VoiceError};

#[derive(Default)]
struct MockInputShared {
    producer: Mutex<Option<ringbuf::HeapProd<i16>>>,
    fault: Mutex<Option<FaultNotifier>>,
    opens: AtomicUsize,
    releases: AtomicUsize,
}

/// A scripted input device.
///
/// Tests push samples with [`push`](MockInput::push) and they flow through
/// the capture pipeline exactly as device audio would. Releasing the same
/// stream twice panics, so double-close bugs fail loudly.
///
/// # Example
///
/// ```
/// use live_voice::capture::MockInput;
/// use live_voice::AudioFormat;
///
/// let mic = MockInput::new(AudioFormat::INPUT);
/// assert_eq!(mic.open_count(), 0);
/// ```
#[derive(Clone)]
pub struct MockInput {
    format: AudioFormat,
    unavailable: bool,
    shared: Arc<MockInputShared>,
}

impl MockInput {
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
            ..Self::new(AudioFormat::INPUT)
        }
    }

    /// Pushes interleaved samples as if the device had captured them.
    ///
    /// Returns how many samples fit into the ring buffer; zero if the device
    /// is not open.
    pub fn push(&self, samples: &[i16]) -> usize {
        self.shared
            .producer
            .lock()
            .as_mut()
            .map_or(0, |producer| producer.push_slice(samples))
    }

    /// Pushes a sine tone of `duration_ms` at the native format.
    pub fn push_sine(&self, frequency: f64, duration_ms: u64, amplitude: f64) -> usize {
        let frames = u64::from(self.format.sample_rate) * duration_ms / 1000;
        let rate = f64::from(self.format.sample_rate);
        let samples: Vec<i16> = (0..frames)
            .flat_map(|i| {
                let t = i as f64 / rate;
                let value = (2.0 * std::f64::consts::PI * frequency * t).sin() * amplitude;
                std::iter::repeat((value * 32767.0) as i16).take(self.format.channels as usize)
            })
            .collect();
        self.push(&samples)
    }

    /// Simulates the device disappearing mid-stream.
    pub fn fail(&self, reason: &str) {
        if let Some(notify) = self.shared.fault.lock().as_ref() {
            notify(reason.to_string());
        }
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

impl InputDevice for MockInput {
    fn name(&self) -> String {
        "mock input".to_string()
    }

    fn native_format(&self) -> Result<AudioFormat, VoiceError> {
        if self.unavailable {
            return Err(VoiceError::device_unavailable(self.name(), "permission denied"));
        }
        Ok(self.format)
    }

    fn start(
        &self,
        producer: ringbuf::HeapProd<i16>,
        on_fault: FaultNotifier,
    ) -> Result<Box<dyn DeviceStream>, VoiceError> {
        if self.unavailable {
            return Err(VoiceError::device_unavailable(self.name(), "permission denied"));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        *self.shared.producer.lock() = Some(producer);
        *self.shared.fault.lock() = Some(on_fault);
        Ok(Box::new(MockInputStream {
            shared: Arc::clone(&self.shared),
            released: AtomicBool::new(false),
        }))
    }
}

struct MockInputStream {
    shared: Arc<MockInputShared>,
    released: AtomicBool,
}

impl DeviceStream for MockInputStream {
    fn release(&mut self) {
        assert!(
            !self.released.swap(true, Ordering::SeqCst),
            "mock input released twice"
        );
        self.shared.producer.lock().take();
        self.shared.fault.lock().take();
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::{Consumer, Split};
    use ringbuf::HeapRb;

    fn noop_fault() -> FaultNotifier {
        Arc::new(|_| {})
    }

    #[test]
    fn test_push_reaches_consumer() {
        let mic = MockInput::new(AudioFormat::INPUT);
        let (producer, mut consumer) = HeapRb::<i16>::new(16).split();
        let _stream = mic.start(producer, noop_fault()).unwrap();

        assert_eq!(mic.push(&[1, 2, 3]), 3);
        let mut out = [0i16; 3];
        assert_eq!(consumer.pop_slice(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_push_before_open_is_dropped() {
        let mic = MockInput::new(AudioFormat::INPUT);
        assert_eq!(mic.push(&[1, 2, 3]), 0);
    }

    #[test]
    fn test_unavailable_refuses_to_open() {
        let mic = MockInput::unavailable();
        assert!(matches!(
            mic.native_format(),
            Err(VoiceError::DeviceUnavailable { .. })
        ));
        assert_eq!(mic.open_count(), 0);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let mic = MockInput::new(AudioFormat::INPUT);
        let (producer, _consumer) = HeapRb::<i16>::new(16).split();
        let mut stream = mic.start(producer, noop_fault()).unwrap();
        stream.release();
        stream.release();
    }

    #[test]
    fn test_sine_has_both_polarities() {
        let mic = MockInput::new(AudioFormat::INPUT);
        let (producer, mut consumer) = HeapRb::<i16>::new(1600).split();
        let _stream = mic.start(producer, noop_fault()).unwrap();

        assert_eq!(mic.push_sine(440.0, 100, 0.5), 1600);
        let mut out = vec![0i16; 1600];
        consumer.pop_slice(&mut out);
        assert!(out.iter().any(|&s| s > 0));
        assert!(out.iter().any(|&s| s < 0));
    }
}
