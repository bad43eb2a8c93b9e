//! Captured audio frames and their wire encoding.

use std::time::Duration;

use crate::format::{encode_pcm16le, mean_abs_level};
use crate::AudioFormat;

/// A fixed-size buffer of captured PCM samples.
///
/// `AudioFrame` is the unit the capture pipeline produces. Frames are
/// immutable and not `Clone`: each one moves from the capture bridge to the
/// transport exactly once.
///
/// # Example
///
/// ```
/// use live_voice::{AudioFormat, AudioFrame};
/// use std::time::Duration;
///
/// let frame = AudioFrame::new(0, vec![0i16; 1600], Duration::ZERO, AudioFormat::INPUT);
/// assert_eq!(frame.duration(), Duration::from_millis(100));
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct AudioFrame {
    sequence: u64,
    samples: Vec<i16>,
    timestamp: Duration,
    format: AudioFormat,
}

impl AudioFrame {
    /// Creates a new frame.
    #[must_use]
    pub fn new(sequence: u64, samples: Vec<i16>, timestamp: Duration, format: AudioFormat) -> Self {
        Self {
            sequence,
            samples,
            timestamp,
            format,
        }
    }

    /// Sequence number assigned at capture time, starting at 0.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Interleaved 16-bit samples.
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Offset from the start of capture.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Sample rate and channel count.
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Number of frames (samples per channel).
    #[must_use]
    pub fn frame_count(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    /// Playback duration of this frame.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.frame_count() as u64)
    }

    /// Returns `true` if the frame holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean absolute amplitude in `[0.0, 1.0]`.
    ///
    /// Meant for level meters only.
    #[must_use]
    pub fn level(&self) -> f32 {
        mean_abs_level(&self.samples)
    }

    /// Consumes the frame and returns its samples.
    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// An [`AudioFrame`] encoded as 16-bit little-endian PCM for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    sequence: u64,
    format: AudioFormat,
    data: Vec<u8>,
}

impl OutboundPacket {
    /// Encodes a frame. The packet keeps the frame's sequence number.
    #[must_use]
    pub fn encode(frame: AudioFrame) -> Self {
        Self {
            sequence: frame.sequence,
            format: frame.format,
            data: encode_pcm16le(&frame.samples),
        }
    }

    /// Sequence number of the frame this packet was encoded from.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Format of the encoded audio.
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Encoded PCM bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl From<AudioFrame> for OutboundPacket {
    fn from(frame: AudioFrame) -> Self {
        Self::encode(frame)
    }
}
