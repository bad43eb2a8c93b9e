//! Cuts converted samples into fixed-size, sequenced frames.

use crate::{AudioFormat, AudioFrame};

/// Accumulates converted samples and emits fixed-size [`AudioFrame`]s.
///
/// Every frame gets the next sequence number, including frames the caller
/// decides to drop while muted, so numbering stays contiguous per handle and
/// muting only ever leaves a gap.
pub(crate) struct Framer {
    format: AudioFormat,
    frame_len: usize,
    pending: Vec<i16>,
    next_sequence: u64,
    samples_emitted: u64,
}

impl Framer {
    /// Creates a framer producing frames of `frame_frames` frames each.
    pub fn new(format: AudioFormat, frame_frames: usize) -> Self {
        let frame_len = frame_frames.max(1) * format.channels.max(1) as usize;
        Self {
            format,
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
            next_sequence: 0,
            samples_emitted: 0,
        }
    }

    /// Number of interleaved samples per frame.
    #[cfg(test)]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Adds samples and returns every frame that is now complete.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_len;
        let mut frames = Vec::with_capacity(complete);
        for _ in 0..complete {
            let rest = self.pending.split_off(self.frame_len);
            let samples = std::mem::replace(&mut self.pending, rest);
            frames.push(self.next_frame(samples));
        }
        frames
    }

    /// Sequence number the next frame will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    fn next_frame(&mut self, samples: Vec<i16>) -> AudioFrame {
        let channels = u64::from(self.format.channels.max(1));
        let timestamp = self.format.duration_of(self.samples_emitted / channels);
        self.samples_emitted += samples.len() as u64;

        let frame = AudioFrame::new(self.next_sequence, samples, timestamp, self.format);
        self.next_sequence += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_emits_only_complete_frames() {
        let mut framer = Framer::new(AudioFormat::INPUT, 160);

        assert!(framer.push(&[0; 100]).is_empty());
        let frames = framer.push(&[0; 300]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples().len() == 160));
        // 80 samples carried over
        assert_eq!(framer.push(&[0; 80]).len(), 1);
    }

    #[test]
    fn test_sequence_numbers_are_contiguous() {
        let mut framer = Framer::new(AudioFormat::INPUT, 10);
        let mut sequences = Vec::new();
        for size in [7, 13, 25, 5, 30] {
            sequences.extend(framer.push(&vec![0; size]).iter().map(AudioFrame::sequence));
        }
        let expected: Vec<u64> = (0..sequences.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert_eq!(framer.next_sequence(), 8);
    }

    #[test]
    fn test_timestamps_advance_by_frame_duration() {
        let mut framer = Framer::new(AudioFormat::INPUT, 1600);
        let frames = framer.push(&[0; 3200]);
        assert_eq!(frames[0].timestamp(), Duration::ZERO);
        assert_eq!(frames[1].timestamp(), Duration::from_millis(100));
    }

    #[test]
    fn test_frames_keep_sample_order() {
        let mut framer = Framer::new(AudioFormat::INPUT, 3);
        let input: Vec<i16> = (0..7).collect();
        let frames = framer.push(&input);
        assert_eq!(frames[0].samples(), &[0, 1, 2]);
        assert_eq!(frames[1].samples(), &[3, 4, 5]);
    }
}
