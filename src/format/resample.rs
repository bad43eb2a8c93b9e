//! Sample rate conversion.
//!
//! Linear interpolation: fast, allocation-light and good enough for speech.
//! Each call is stateless, so callers convert whole frames at a time.

/// Resamples mono audio from `from_rate` to `to_rate`.
///
/// Returns an empty vector if `to_rate` is zero, and the input unchanged if
/// the rates match.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples[samples.len() - 1];

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let src_idx = src_pos.floor() as usize;
            let frac = src_pos - src_idx as f64;

            match (samples.get(src_idx), samples.get(src_idx + 1)) {
                (Some(&s1), Some(&s2)) => {
                    let (s1, s2) = (f64::from(s1), f64::from(s2));
                    (s1 + (s2 - s1) * frac) as i16
                }
                (Some(&s1), None) => s1,
                _ => last,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![100i16, 200, 300];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_empty() {
        assert!(resample(&[], 16000, 8000).is_empty());
    }

    #[test]
    fn test_resample_downsample() {
        // 48kHz to 16kHz = 3:1 ratio
        let samples: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        assert_eq!(resample(&samples, 48000, 16000).len(), 160);
    }

    #[test]
    fn test_resample_24k_to_48k() {
        let samples = vec![0i16, 1000, 2000, 3000];
        let resampled = resample(&samples, 24000, 48000);
        assert_eq!(resampled.len(), 8);
        assert_eq!(resampled[0], 0);
        assert_eq!(resampled[2], 1000);
        assert_eq!(resampled[1], 500);
    }

    #[test]
    fn test_resample_zero_rates() {
        assert!(resample(&[100, 200], 16000, 0).is_empty());
        assert!(resample(&[100, 200], 0, 16000).is_empty());
    }

    #[test]
    fn test_resample_single_sample() {
        let result = resample(&[500], 1, 10);
        assert_eq!(result.len(), 10);
        assert!(result.iter().all(|&s| s == 500));
    }
}
