//! BPM view over the detector's inter-beat intervals

use serde::{Deserialize, Serialize};

/// Inter-beat intervals with their BPM mapping, oldest first.
///
/// Derived entirely from the beat detector's history; it carries no state of
/// its own and empties exactly when the detector resets.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HrvSeries {
    pub ibi_ms: Vec<u32>,
    pub bpm: Vec<f32>,
}

impl HrvSeries {
    pub fn from_intervals<I: IntoIterator<Item = u32>>(intervals: I) -> Self {
        let ibi_ms: Vec<u32> = intervals.into_iter().collect();
        let bpm = ibi_ms.iter().map(|&ibi| bpm_from_interval(ibi)).collect();
        Self { ibi_ms, bpm }
    }

    pub fn latest_bpm(&self) -> Option<f32> {
        self.bpm.last().copied()
    }

    pub fn len(&self) -> usize {
        self.ibi_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ibi_ms.is_empty()
    }
}

/// Instantaneous BPM for one interval, guarded against a zero interval
pub fn bpm_from_interval(ibi_ms: u32) -> f32 {
    60_000.0 / ibi_ms.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_mapping() {
        assert_eq!(bpm_from_interval(600), 100.0);
        assert_eq!(bpm_from_interval(1000), 60.0);
        assert_eq!(bpm_from_interval(0), 60_000.0);
    }

    #[test]
    fn test_series_pairs_up() {
        let series = HrvSeries::from_intervals([600, 750, 1000]);
        assert_eq!(series.len(), 3);
        assert_eq!(series.ibi_ms, vec![600, 750, 1000]);
        assert_eq!(series.bpm, vec![100.0, 80.0, 60.0]);
        assert_eq!(series.latest_bpm(), Some(60.0));
    }

    #[test]
    fn test_empty_series() {
        let series = HrvSeries::from_intervals([]);
        assert!(series.is_empty());
        assert_eq!(series.latest_bpm(), None);
    }
}
