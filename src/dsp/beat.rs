//! Adaptive-threshold beat detection
//!
//! The detector tracks a slow running mean of the signal and chases a
//! threshold held a fixed offset above it. A beat fires on a rising edge
//! that crosses the threshold outside the refractory window. The constants
//! are empirical tunings for fingertip PPG traces and live in `BeatConfig`
//! so alternative sensors can adjust them.

use std::collections::VecDeque;

use super::ADC_MAX;

/// Tuning for [`BeatDetector`]
#[derive(Debug, Clone)]
pub struct BeatConfig {
    /// Per-sample smoothing of the running signal mean
    pub mean_smoothing: f32,
    /// Per-sample smoothing of the chased threshold
    pub threshold_smoothing: f32,
    /// ADC counts the threshold sits above the running mean
    pub threshold_offset: f32,
    /// Minimum gap between beats in milliseconds
    pub refractory_ms: u64,
    /// Retained inter-beat intervals
    pub ibi_capacity: usize,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            mean_smoothing: 0.995,
            threshold_smoothing: 0.99,
            threshold_offset: 80.0,
            refractory_ms: 220,
            ibi_capacity: 60,
        }
    }
}

/// A detected beat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat {
    /// Timestamp of the crossing, in session milliseconds
    pub at_ms: u64,
    /// Interval since the previous beat, absent for the first beat
    pub ibi_ms: Option<u32>,
}

pub struct BeatDetector {
    config: BeatConfig,
    running_mean: f32,
    threshold: f32,
    last_signal: f32,
    /// 0 means no beat recorded yet; a beat landing at t=0 is stored as 1
    last_beat_ms: u64,
    beat_count: u64,
    intervals: VecDeque<u32>,
}

impl BeatDetector {
    pub fn new() -> Self {
        Self::with_config(BeatConfig::default())
    }

    pub fn with_config(config: BeatConfig) -> Self {
        let mut detector = Self {
            intervals: VecDeque::with_capacity(config.ibi_capacity),
            config,
            running_mean: 0.0,
            threshold: 0.0,
            last_signal: 0.0,
            last_beat_ms: 0,
            beat_count: 0,
        };
        detector.reset();
        detector
    }

    /// Feed one sample in [0, 1] at the given session time.
    ///
    /// Returns the beat when this sample fires one. Samples must arrive with
    /// non-decreasing timestamps; garbage amplitudes degrade detection but
    /// never fail.
    pub fn update(&mut self, sample: f32, now_ms: u64) -> Option<Beat> {
        let scaled = sample * ADC_MAX as f32;

        self.running_mean = self.config.mean_smoothing * self.running_mean
            + (1.0 - self.config.mean_smoothing) * scaled;
        self.threshold = self.config.threshold_smoothing * self.threshold
            + (1.0 - self.config.threshold_smoothing)
                * (self.running_mean + self.config.threshold_offset);

        let rising = sample > self.last_signal;
        let above = scaled > self.threshold;
        let clear = self.last_beat_ms == 0
            || now_ms.saturating_sub(self.last_beat_ms) > self.config.refractory_ms;

        let beat = if rising && above && clear {
            let ibi_ms = if self.last_beat_ms > 1 {
                let ibi = (now_ms - self.last_beat_ms).min(u32::MAX as u64) as u32;
                self.intervals.push_back(ibi);
                while self.intervals.len() > self.config.ibi_capacity {
                    self.intervals.pop_front();
                }
                Some(ibi)
            } else {
                None
            };
            // A beat exactly at t=0 would collide with the no-beat sentinel
            self.last_beat_ms = now_ms.max(1);
            self.beat_count += 1;
            Some(Beat { at_ms: now_ms, ibi_ms })
        } else {
            None
        };

        self.last_signal = sample;
        beat
    }

    /// Retained inter-beat intervals, oldest first
    pub fn intervals(&self) -> impl Iterator<Item = u32> + '_ {
        self.intervals.iter().copied()
    }

    /// The most recent inter-beat interval
    pub fn latest_interval(&self) -> Option<u32> {
        self.intervals.back().copied()
    }

    /// Beats detected since the last reset
    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn running_mean(&self) -> f32 {
        self.running_mean
    }

    /// Restore the initial state: mean at mid-scale, threshold one offset above
    pub fn reset(&mut self) {
        self.running_mean = 512.0;
        self.threshold = self.running_mean + self.config.threshold_offset;
        self.last_signal = 0.0;
        self.last_beat_ms = 0;
        self.beat_count = 0;
        self.intervals.clear();
    }
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new()
    }
}
