//! Bounded sample series for waveform retention

use std::collections::VecDeque;

/// Default retention for the scrolling waveform
pub const DEFAULT_MAX_POINTS: usize = 1000;

/// Ordered, bounded series of samples.
///
/// Appends trim the oldest points once `max_points` is reached, so the series
/// always holds the most recent window of the stream in arrival order. Reads
/// never mutate.
#[derive(Debug, Clone)]
pub struct SampleSeries<T> {
    points: VecDeque<T>,
    max_points: usize,
}

impl<T: Copy> SampleSeries<T> {
    pub fn new(max_points: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(max_points.min(DEFAULT_MAX_POINTS)),
            max_points,
        }
    }

    /// Append one sample, evicting the oldest if the series is full
    pub fn push(&mut self, value: T) {
        self.points.push_back(value);
        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
    }

    /// Append a batch of samples in order; appending nothing is a no-op
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        self.points.extend(values);
        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
    }

    /// The most recent `count` samples, oldest first.
    ///
    /// Returns fewer than `count` when the series holds fewer.
    pub fn tail(&self, count: usize) -> Vec<T> {
        let skip = self.points.len().saturating_sub(count);
        self.points.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_stays_within_capacity() {
        let mut series = SampleSeries::new(5);
        for i in 0..100u16 {
            series.push(i);
            assert!(series.len() <= 5);
        }
        assert_eq!(series.tail(5), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let mut series = SampleSeries::new(3);
        for value in [1u16, 2, 3, 4, 5] {
            series.push(value);
        }
        assert_eq!(series.tail(10), vec![3, 4, 5]);
    }

    #[test]
    fn test_extend_trims_like_push() {
        let mut series = SampleSeries::new(4);
        series.extend([1u16, 2]);
        // A batch larger than the remaining room evicts from the front
        series.extend([3, 4, 5, 6]);
        assert_eq!(series.tail(10), vec![3, 4, 5, 6]);

        series.extend(std::iter::empty());
        assert_eq!(series.len(), 4);
    }

    #[test]
    fn test_tail_returns_fewer_when_short() {
        let mut series = SampleSeries::new(10);
        series.push(7u16);
        series.push(8);
        assert_eq!(series.tail(5), vec![7, 8]);
        // Reads do not consume
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut series = SampleSeries::new(4);
        series.push(1u16);
        series.push(2);
        series.clear();
        assert!(series.is_empty());
        assert!(series.tail(4).is_empty());
    }
}
