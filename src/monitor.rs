//! Single-owner state for the monitored signal
//!
//! The session task owns exactly one `Monitor` and is the only writer; every
//! read and mutation happens inside its actor turn, so nothing here locks.
//! The monitor wires the dsp parts together: raw samples feed the bounded
//! series, the display filter, and the beat detector, gated by the active
//! view mode.

use log::debug;

use crate::dsp::{
    BeatDetector, HrvSeries, SampleSeries, SinglePoleFilter, SpectrumAnalyzer, bpm_from_interval,
    normalize,
};
use crate::ingest::ScalarReadings;
use crate::protocol::ViewMode;

pub struct Monitor {
    raw: SampleSeries<u16>,
    filtered: SampleSeries<f32>,
    filter: SinglePoleFilter,
    detector: BeatDetector,
    analyzer: SpectrumAnalyzer,
    mode: ViewMode,
    readings: ScalarReadings,
    samples_seen: u64,
}

impl Monitor {
    pub fn new(max_points: usize) -> Self {
        Self {
            raw: SampleSeries::new(max_points),
            filtered: SampleSeries::new(max_points),
            filter: SinglePoleFilter::default(),
            detector: BeatDetector::new(),
            analyzer: SpectrumAnalyzer::new(),
            mode: ViewMode::default(),
            readings: ScalarReadings::default(),
            samples_seen: 0,
        }
    }

    /// Append raw samples stamped with the session time.
    ///
    /// In filtered mode each sample steps the display filter and the detector
    /// sees the smoothed value; in raw mode the detector sees the normalized
    /// sample directly. Returns how many beats fired.
    pub fn push(&mut self, samples: &[u16], now_ms: u64) -> usize {
        self.raw.extend(samples.iter().copied());

        let mut beats = 0;
        for &raw in samples {
            let normalized = normalize(raw);
            let signal = match self.mode {
                ViewMode::Filtered => {
                    let smoothed = self.filter.step(normalized);
                    self.filtered.push(smoothed);
                    smoothed
                }
                ViewMode::Raw => normalized,
            };
            if let Some(beat) = self.detector.update(signal, now_ms) {
                match beat.ibi_ms {
                    Some(ibi) => debug!("beat at {} ms, ibi {} ms", beat.at_ms, ibi),
                    None => debug!("first beat at {} ms", beat.at_ms),
                }
                beats += 1;
            }
        }
        self.samples_seen += samples.len() as u64;
        beats
    }

    /// The most recent `count` points of the requested trace, oldest first,
    /// normalized to [0, 1] for the raw trace
    pub fn waveform(&self, mode: ViewMode, count: usize) -> Vec<f32> {
        match mode {
            ViewMode::Raw => self.raw.tail(count).into_iter().map(normalize).collect(),
            ViewMode::Filtered => self.filtered.tail(count),
        }
    }

    /// Spectrum magnitudes over the most recent `size` raw samples
    pub fn spectrum(&mut self, size: usize) -> Vec<f32> {
        let window = self.raw.tail(size);
        self.analyzer.analyze(&window, size)
    }

    pub fn hrv(&self) -> HrvSeries {
        HrvSeries::from_intervals(self.detector.intervals())
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Switch the active trace. Any actual change restarts the filter so the
    /// smoothed trace never stitches across a mode boundary.
    pub fn set_mode(&mut self, mode: ViewMode) {
        if mode != self.mode {
            self.mode = mode;
            self.reset_filter();
        }
    }

    /// Restart the display filter and its trace
    pub fn reset_filter(&mut self) {
        self.filter.reset();
        self.filtered.clear();
    }

    /// Clear every derived and passthrough reading. The view mode survives.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.filtered.clear();
        self.filter.reset();
        self.detector.reset();
        self.readings = ScalarReadings::default();
        self.samples_seen = 0;
    }

    pub fn apply_readings(&mut self, readings: ScalarReadings) {
        self.readings = readings;
    }

    pub fn readings(&self) -> ScalarReadings {
        self.readings
    }

    pub fn beat_count(&self) -> u64 {
        self.detector.beat_count()
    }

    pub fn latest_interval(&self) -> Option<u32> {
        self.detector.latest_interval()
    }

    /// BPM derived from the most recent detected interval
    pub fn detected_bpm(&self) -> Option<f32> {
        self.detector.latest_interval().map(bpm_from_interval)
    }

    /// Samples consumed since the last reset
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_spike_train(monitor: &mut Monitor, total: usize) {
        for i in 0..total {
            let raw = if i % 60 == 10 { 900 } else { 500 };
            monitor.push(&[raw], i as u64 * 10);
        }
    }

    #[test]
    fn test_raw_mode_leaves_filtered_trace_empty() {
        let mut monitor = Monitor::new(100);
        monitor.push(&[100, 500, 900], 10);

        assert_eq!(monitor.waveform(ViewMode::Raw, 10).len(), 3);
        assert!(monitor.waveform(ViewMode::Filtered, 10).is_empty());
        assert_eq!(monitor.samples_seen(), 3);
    }

    #[test]
    fn test_raw_waveform_is_normalized() {
        let mut monitor = Monitor::new(100);
        monitor.push(&[0, 1023], 10);
        assert_eq!(monitor.waveform(ViewMode::Raw, 10), vec![0.0, 1.0]);
    }

    #[test]
    fn test_filtered_mode_smooths() {
        let mut monitor = Monitor::new(100);
        monitor.set_mode(ViewMode::Filtered);
        monitor.push(&[1023, 1023, 1023], 10);

        let trace = monitor.waveform(ViewMode::Filtered, 10);
        assert_eq!(trace.len(), 3);
        // First output is one filter step from zero, well below the input
        assert!(trace[0] < 0.5);
        assert!(trace[0] < trace[1] && trace[1] < trace[2]);
    }

    #[test]
    fn test_spike_train_counts_beats() {
        let mut monitor = Monitor::new(1000);
        feed_spike_train(&mut monitor, 300);

        assert_eq!(monitor.beat_count(), 5);
        let hrv = monitor.hrv();
        assert_eq!(hrv.ibi_ms, vec![600, 600, 600, 600]);
        assert_eq!(hrv.bpm, vec![100.0, 100.0, 100.0, 100.0]);
        assert_eq!(monitor.detected_bpm(), Some(100.0));
    }

    #[test]
    fn test_mode_change_restarts_filter() {
        let mut monitor = Monitor::new(100);
        monitor.set_mode(ViewMode::Filtered);
        monitor.push(&[900, 900, 900], 10);
        assert!(!monitor.waveform(ViewMode::Filtered, 10).is_empty());

        monitor.set_mode(ViewMode::Raw);
        assert!(monitor.waveform(ViewMode::Filtered, 10).is_empty());

        // Back into filtered mode the filter starts from zero again
        monitor.set_mode(ViewMode::Filtered);
        monitor.push(&[900], 100);
        let trace = monitor.waveform(ViewMode::Filtered, 10);
        assert!((trace[0] - 0.18 * normalize(900)).abs() < 1e-4);
    }

    #[test]
    fn test_setting_same_mode_keeps_state() {
        let mut monitor = Monitor::new(100);
        monitor.set_mode(ViewMode::Filtered);
        monitor.push(&[900, 900], 10);
        let before = monitor.waveform(ViewMode::Filtered, 10);

        monitor.set_mode(ViewMode::Filtered);
        assert_eq!(monitor.waveform(ViewMode::Filtered, 10), before);
    }

    #[test]
    fn test_reset_filter_alone_restarts_the_smoothed_trace() {
        let mut monitor = Monitor::new(100);
        monitor.set_mode(ViewMode::Filtered);
        monitor.push(&[900, 900, 900], 10);

        monitor.reset_filter();
        assert!(monitor.waveform(ViewMode::Filtered, 10).is_empty());
        // The raw trace is untouched
        assert_eq!(monitor.waveform(ViewMode::Raw, 10).len(), 3);

        monitor.push(&[900], 100);
        let trace = monitor.waveform(ViewMode::Filtered, 10);
        assert!((trace[0] - 0.18 * normalize(900)).abs() < 1e-4);
    }

    #[test]
    fn test_spectrum_over_raw_trace() {
        let mut monitor = Monitor::new(1000);
        for n in 0..256u32 {
            let phase = 2.0 * std::f32::consts::PI * 8.0 * n as f32 / 256.0;
            monitor.push(&[(512.0 + 400.0 * phase.sin()) as u16], n as u64 * 10);
        }
        let bins = monitor.spectrum(256);
        assert_eq!(bins.len(), 128);
        let peak = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
    }

    #[test]
    fn test_reset_clears_everything_but_mode() {
        let mut monitor = Monitor::new(1000);
        monitor.set_mode(ViewMode::Filtered);
        feed_spike_train(&mut monitor, 300);
        monitor.apply_readings(ScalarReadings {
            heartbeat: Some(72.0),
            temperature: Some(36.5),
            finger: true,
        });

        monitor.reset();

        assert!(monitor.waveform(ViewMode::Raw, 10).is_empty());
        assert!(monitor.waveform(ViewMode::Filtered, 10).is_empty());
        assert!(monitor.hrv().is_empty());
        assert_eq!(monitor.beat_count(), 0);
        assert_eq!(monitor.detected_bpm(), None);
        assert_eq!(monitor.readings(), ScalarReadings::default());
        assert_eq!(monitor.samples_seen(), 0);
        assert_eq!(monitor.mode(), ViewMode::Filtered);
    }
}
