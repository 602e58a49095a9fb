//! Channel mixing and sample-rate conversion to the 16 kHz mono format the
//! STT engine expects.
//!
//! Linear interpolation is enough for speech recognition input; it keeps
//! the conversion allocation-light inside the pass loop.

use super::capture::AudioChunk;

/// Sample rate the STT engine consumes.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Average interleaved channels down to one.
///
/// ```rust
/// use voice_client::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Resample mono audio from `from_rate` to `to_rate`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).round() as usize;

    (0..output_len)
        .map(|i| {
            let src = i as f64 / ratio;
            let idx = src as usize;
            let frac = (src - idx as f64) as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                (Some(a), None) => *a,
                _ => 0.0,
            }
        })
        .collect()
}

/// Convert a capture chunk to 16 kHz mono.
pub fn to_mono_16k(chunk: &AudioChunk) -> Vec<f32> {
    let mono = downmix(&chunk.samples, chunk.channels);
    resample(&mono, chunk.sample_rate, TARGET_SAMPLE_RATE)
}
