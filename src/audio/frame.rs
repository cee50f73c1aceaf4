//! Fixed-length normalized sample frames.
//!
//! A frame is exactly one classifier window: 15 600 samples of 16 kHz mono
//! audio (0.975 s). Raw 16-bit PCM is scaled to [-1, 1], multiplied by the
//! configured gain and clamped, so gains above 1.0 can clip.

/// Capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per classifier window.
pub const FRAME_LEN: usize = 15_600;

/// Full-scale magnitude of 16-bit PCM.
pub const PCM_FULL_SCALE: f32 = 32_768.0;

/// One window of normalized, gain-adjusted audio.
///
/// Frames are transient: produced once per read cycle and consumed
/// immediately by the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    peak_amplitude: u32,
}

impl AudioFrame {
    /// Normalize raw PCM into a frame.
    ///
    /// With `noise_reduction` the mean of the chunk (DC offset) is removed
    /// before scaling.
    pub fn from_pcm(raw: &[i16], gain: f32, noise_reduction: bool) -> Self {
        let peak_amplitude = peak_amplitude(raw);
        let samples = if noise_reduction {
            let offset = dc_offset(raw);
            raw.iter()
                .map(|&s| clamp_unit((s as f32 - offset) / PCM_FULL_SCALE * gain))
                .collect()
        } else {
            raw.iter().map(|&s| normalize_sample(s, gain)).collect()
        };

        Self {
            samples,
            peak_amplitude,
        }
    }

    /// Wrap already-normalized samples (fixtures, offline files).
    pub fn from_samples(samples: Vec<f32>) -> Self {
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        Self {
            samples,
            peak_amplitude: (peak * PCM_FULL_SCALE).round() as u32,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw peak amplitude of the chunk before normalization.
    pub fn peak_amplitude(&self) -> u32 {
        self.peak_amplitude
    }

    /// Frame duration in milliseconds at [`SAMPLE_RATE`].
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / SAMPLE_RATE as u64
    }
}

/// Map one raw sample to [-1, 1] after gain.
#[inline]
pub fn normalize_sample(sample: i16, gain: f32) -> f32 {
    clamp_unit(sample as f32 / PCM_FULL_SCALE * gain)
}

/// Largest absolute raw sample value (32 768 for `i16::MIN`).
pub fn peak_amplitude(raw: &[i16]) -> u32 {
    raw.iter()
        .map(|&s| (s as i32).unsigned_abs())
        .max()
        .unwrap_or(0)
}

/// Coarse pre-classifier gate: strictly-below-floor chunks are dropped.
#[inline]
pub fn passes_silence_gate(peak: u32, silence_floor: u32) -> bool {
    peak >= silence_floor
}

fn dc_offset(raw: &[i16]) -> f32 {
    if raw.is_empty() {
        return 0.0;
    }
    let sum: i64 = raw.iter().map(|&s| s as i64).sum();
    sum as f32 / raw.len() as f32
}

#[inline]
fn clamp_unit(value: f32) -> f32 {
    value.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        assert_eq!(FRAME_LEN as f32 / SAMPLE_RATE as f32, 0.975);
        let frame = AudioFrame::from_pcm(&vec![0i16; FRAME_LEN], 1.0, false);
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(frame.duration_ms(), 975);
    }

    #[test]
    fn test_normalization_matches_scaled_clamp() {
        for &gain in &[0.5f32, 1.0, 1.5, 2.0] {
            for &raw in &[i16::MIN, -16_384, -1, 0, 1, 1000, 16_384, i16::MAX] {
                let expected = (raw as f32 / 32_768.0 * gain).clamp(-1.0, 1.0);
                assert_eq!(normalize_sample(raw, gain), expected);
            }
        }
    }

    #[test]
    fn test_full_scale_with_double_gain_clips() {
        assert_eq!(normalize_sample(i16::MIN, 2.0), -1.0);
        assert_eq!(normalize_sample(i16::MAX, 2.0), 1.0);
        assert_eq!(normalize_sample(i16::MIN, 1.0), -1.0);
    }

    #[test]
    fn test_peak_amplitude() {
        assert_eq!(peak_amplitude(&[]), 0);
        assert_eq!(peak_amplitude(&[3, -7, 5]), 7);
        assert_eq!(peak_amplitude(&[i16::MIN, 0]), 32_768);
    }

    #[test]
    fn test_silence_gate_boundary() {
        assert!(!passes_silence_gate(99, 100));
        assert!(passes_silence_gate(100, 100));
        assert!(passes_silence_gate(101, 100));
        assert!(passes_silence_gate(0, 0));
    }

    #[test]
    fn test_noise_reduction_removes_offset() {
        let raw = vec![1000i16; 64];
        let frame = AudioFrame::from_pcm(&raw, 1.0, true);
        assert!(frame.samples().iter().all(|s| s.abs() < 1e-6));
        assert_eq!(frame.peak_amplitude(), 1000);

        let plain = AudioFrame::from_pcm(&raw, 1.0, false);
        assert!(plain.samples().iter().all(|s| (*s - 1000.0 / 32_768.0).abs() < 1e-6));
    }
}
