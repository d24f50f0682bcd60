//! Signal-processing core for the pulse waveform
//!
//! Everything in this module is synchronous and allocation-light; the session
//! task drives it at a fixed cadence. The pipeline is:
//! - `series`: bounded retention of the raw and filtered traces
//! - `filter`: single-pole IIR smoothing
//! - `beat`: adaptive-threshold beat detection with refractory gating
//! - `spectrum`: Hann-windowed FFT magnitudes over the raw trace
//! - `hrv`: BPM view over the detector's inter-beat intervals

mod beat;
mod filter;
mod hrv;
mod series;
mod spectrum;

pub use beat::BeatDetector;
pub use filter::SinglePoleFilter;
pub use hrv::{HrvSeries, bpm_from_interval};
pub use series::{DEFAULT_MAX_POINTS, SampleSeries};
pub use spectrum::{DEFAULT_SPECTRUM_SIZE, SpectrumAnalyzer};

/// Full-scale reading of the sensor's 10-bit ADC
pub const ADC_MAX: u16 = 1023;

/// Map a raw ADC sample into [0, 1]
#[inline]
pub fn normalize(raw: u16) -> f32 {
    (raw.min(ADC_MAX) as f32) / ADC_MAX as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize(0), 0.0);
        assert_eq!(normalize(ADC_MAX), 1.0);
        assert!((normalize(512) - 0.5).abs() < 1e-3);
    }
}
