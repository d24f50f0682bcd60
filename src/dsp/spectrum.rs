//! Hann-windowed FFT magnitudes over the raw trace

use rustfft::{FftPlanner, num_complex::Complex};

/// Default transform size when a client does not ask for one
pub const DEFAULT_SPECTRUM_SIZE: usize = 256;

/// Magnitude spectrum computed over the most recent window of raw samples.
///
/// The analyzer is a pure function of its input window: two calls over the
/// same samples produce identical output. The planner only caches FFT plans
/// between calls.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Magnitudes for bins `0..size/2` over the most recent `size` samples.
    ///
    /// `size` must be a power of two; callers taking sizes from untrusted
    /// input validate before calling. When fewer than `size` samples are
    /// available the normalized signal is front-padded with zeros, so the
    /// supplied samples keep their alignment at the recent end of the window.
    pub fn analyze(&mut self, samples: &[u16], size: usize) -> Vec<f32> {
        assert!(size.is_power_of_two(), "transform size must be a power of two");

        let take = samples.len().min(size);
        let mut signal = vec![0.0f32; size];
        for (slot, &raw) in signal[size - take..]
            .iter_mut()
            .zip(&samples[samples.len() - take..])
        {
            // Center the unsigned trace on zero so padding carries no energy
            *slot = super::normalize(raw) * 2.0 - 1.0;
        }

        // Symmetric Hann window to reduce spectral leakage
        let denom = size.saturating_sub(1).max(1) as f32;
        let mut windowed: Vec<Complex<f32>> = signal
            .iter()
            .enumerate()
            .map(|(n, &s)| {
                let w = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / denom).cos());
                Complex::new(s * w, 0.0)
            })
            .collect();

        let fft = self.planner.plan_fft_forward(size);
        fft.process(&mut windowed);

        windowed[..size / 2].iter().map(|c| c.norm()).collect()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
