//! Sample format, channel and byte-order conversion.

use crate::format::resample;
use crate::{AudioFormat, VoiceError};

/// Converts an f32 sample to i16.
///
/// Input should be in the range [-1.0, 1.0]; values outside are clamped.
/// Scales by 32767 so that -1.0 maps to -32767, keeping the range symmetric.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts an i16 sample to f32 in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Averages interleaved channels down to mono.
///
/// Trailing samples that do not form a complete frame are ignored.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .chunks_exact(n as usize)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / i32::from(n)) as i16
            })
            .collect(),
    }
}

/// Duplicates each mono sample across `channels`.
pub fn upmix_from_mono(mono: &[i16], channels: u16) -> Vec<i16> {
    mono.iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels as usize))
        .collect()
}

/// Encodes samples as 16-bit little-endian PCM.
pub fn encode_pcm16le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decodes 16-bit little-endian PCM.
///
/// # Errors
///
/// Returns [`VoiceError::Decode`] if the payload has an odd number of bytes.
pub fn decode_pcm16le(bytes: &[u8]) -> Result<Vec<i16>, VoiceError> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Mean absolute amplitude normalized to `[0.0, 1.0]`.
pub fn mean_abs_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: u64 = samples
        .iter()
        .map(|&s| u64::from(s.unsigned_abs()))
        .sum();
    (sum as f64 / samples.len() as f64 / 32768.0) as f32
}

/// Converts interleaved i16 audio between formats.
///
/// Channels are mixed down to mono first, resampled, then spread back out to
/// the target channel count.
#[derive(Debug, Clone, Copy)]
pub struct FormatConverter {
    from: AudioFormat,
    to: AudioFormat,
}

impl FormatConverter {
    /// Creates a converter from `from` to `to`.
    pub fn new(from: AudioFormat, to: AudioFormat) -> Self {
        Self { from, to }
    }

    /// Returns `true` if conversion is a no-op.
    pub fn is_passthrough(&self) -> bool {
        self.from == self.to
    }

    /// Converts one block of interleaved samples.
    pub fn convert(&self, samples: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return samples.to_vec();
        }
        let mono = downmix_to_mono(samples, self.from.channels);
        let resampled = resample(&mono, self.from.sample_rate, self.to.sample_rate);
        if self.to.channels <= 1 {
            resampled
        } else {
            upmix_from_mono(&resampled, self.to.channels)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_range() {
        assert!((i16_to_f32(32767) - 0.99997).abs() < 0.001);
        assert!((i16_to_f32(-32768) + 1.0).abs() < 0.001);
        assert_eq!(i16_to_f32(0), 0.0);
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix_to_mono(&[100, 200, 300, 400], 2), vec![150, 350]);
        // Opposite values cancel
        assert_eq!(downmix_to_mono(&[1000, -1000], 2), vec![0]);
    }

    #[test]
    fn test_downmix_ignores_partial_frame() {
        assert_eq!(downmix_to_mono(&[10, 20, 30, 40, 50], 4), vec![25]);
    }

    #[test]
    fn test_upmix() {
        assert_eq!(upmix_from_mono(&[1, 2], 2), vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_decode_pcm16le_rejects_odd_length() {
        assert!(matches!(
            decode_pcm16le(&[0x01, 0x02, 0x03]),
            Err(VoiceError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_pcm16le_values() {
        let samples = decode_pcm16le(&[0x34, 0x12, 0x00, 0x80]).unwrap();
        assert_eq!(samples, vec![0x1234, i16::MIN]);
    }

    #[test]
    fn test_mean_abs_level() {
        assert_eq!(mean_abs_level(&[]), 0.0);
        let level = mean_abs_level(&[16384, -16384]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_converter_48k_stereo_to_16k_mono() {
        let converter = FormatConverter::new(AudioFormat::new(48000, 2), AudioFormat::INPUT);
        let stereo = vec![1000i16; 4800 * 2];
        let converted = converter.convert(&stereo);
        assert_eq!(converted.len(), 1600);
        assert!(converted.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_converter_passthrough() {
        let converter = FormatConverter::new(AudioFormat::INPUT, AudioFormat::INPUT);
        assert!(converter.is_passthrough());
        assert_eq!(converter.convert(&[1, 2, 3]), vec![1, 2, 3]);
    }
}
