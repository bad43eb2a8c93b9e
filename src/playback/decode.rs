//! Inbound audio decoding: base64 PCM16LE → mono f32 at the device rate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::format::{decode_pcm16le, downmix_to_mono, i16_to_f32, resample};
use crate::{AudioFormat, VoiceError};

/// Decodes one inbound chunk for playback on a device running at
/// `device_rate`.
///
/// # Errors
///
/// Returns [`VoiceError::Decode`] if the payload is not valid base64, has an
/// odd byte count, or does not hold whole frames for `source.channels`.
pub fn decode_chunk(data: &str, source: AudioFormat, device_rate: u32) -> Result<Vec<f32>, VoiceError> {
    if source.sample_rate == 0 || source.channels == 0 {
        return Err(VoiceError::Decode(format!(
            "unplayable source format {}Hz/{}ch",
            source.sample_rate, source.channels
        )));
    }
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| VoiceError::Decode(format!("invalid base64: {e}")))?;
    let samples = decode_pcm16le(&bytes)?;
    if samples.len() % source.channels as usize != 0 {
        return Err(VoiceError::Decode(format!(
            "{} samples do not divide into {} channels",
            samples.len(),
            source.channels
        )));
    }

    let mono = downmix_to_mono(&samples, source.channels);
    let resampled = resample(&mono, source.sample_rate, device_rate);
    Ok(resampled.into_iter().map(i16_to_f32).collect())
}
