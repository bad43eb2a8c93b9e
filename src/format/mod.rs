//! Audio format conversion utilities.
//!
//! - Sample format conversion (f32 ↔ i16)
//! - Channel conversion (any ↔ mono)
//! - Sample rate conversion (resampling)
//! - 16-bit little-endian PCM, the wire encoding in both directions

mod convert;
mod resample;

pub use convert::{
    decode_pcm16le, downmix_to_mono, encode_pcm16le, f32_to_i16, i16_to_f32, mean_abs_level,
    upmix_from_mono, FormatConverter,
};
pub use resample::resample;
