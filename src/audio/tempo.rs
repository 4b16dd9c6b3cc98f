use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Beat spacings outside this range (300 - 30 BPM) are treated as noise.
const MIN_INTERVAL_SECONDS: f64 = 0.2;
const MAX_INTERVAL_SECONDS: f64 = 2.0;
const MIN_VALID_INTERVALS: usize = 2;

/// Published tempo plus the beat spacings it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmEstimate {
    pub current_bpm: f32,
    /// Most recent valid beat intervals in seconds, oldest first.
    pub interval_history: VecDeque<f32>,
}

/// Median-filtered, exponentially smoothed tempo from beat timestamps.
#[derive(Debug, Clone)]
pub struct BpmEstimator {
    min_bpm: f32,
    max_bpm: f32,
    default_bpm: f32,
    blend: f32,
    capacity: usize,
    estimate: BpmEstimate,
    scratch: Vec<f32>,
}

impl BpmEstimator {
    pub fn new(min_bpm: f32, max_bpm: f32, default_bpm: f32, blend: f32, capacity: usize) -> Self {
        Self {
            min_bpm,
            max_bpm,
            default_bpm,
            blend,
            capacity,
            estimate: BpmEstimate {
                current_bpm: default_bpm,
                interval_history: VecDeque::with_capacity(capacity),
            },
            scratch: Vec::with_capacity(capacity),
        }
    }

    pub fn current_bpm(&self) -> f32 {
        self.estimate.current_bpm
    }

    pub fn estimate(&self) -> &BpmEstimate {
        &self.estimate
    }

    /// Refresh the estimate from beat timestamps (oldest first).
    ///
    /// Returns the new tempo when the published value moved, `None` when it
    /// held, including when there were too few valid intervals to estimate.
    pub fn update<I>(&mut self, beat_timestamps: I) -> Option<f32>
    where
        I: IntoIterator<Item = f64>,
    {
        let intervals = &mut self.estimate.interval_history;
        intervals.clear();

        let mut previous: Option<f64> = None;
        for timestamp in beat_timestamps {
            if let Some(prev) = previous {
                let delta = timestamp - prev;
                if (MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&delta) {
                    intervals.push_back(delta as f32);
                    if intervals.len() > self.capacity {
                        intervals.pop_front();
                    }
                }
            }
            previous = Some(timestamp);
        }

        if intervals.len() < MIN_VALID_INTERVALS {
            debug!(
                "Tempo update skipped: {} valid beat intervals",
                intervals.len()
            );
            return None;
        }

        self.scratch.clear();
        self.scratch.extend(intervals.iter().map(|&interval| 60.0 / interval));
        self.scratch.sort_by(f32::total_cmp);

        let mid = self.scratch.len() / 2;
        let median = if self.scratch.len() % 2 == 0 {
            (self.scratch[mid - 1] + self.scratch[mid]) / 2.0
        } else {
            self.scratch[mid]
        };

        let target = median.clamp(self.min_bpm, self.max_bpm);
        let current = self.estimate.current_bpm;
        let next = (current + (target - current) * self.blend).clamp(self.min_bpm, self.max_bpm);

        debug!(
            "Tempo median {:.1} BPM over {} intervals, published {:.1} -> {:.1}",
            median,
            self.scratch.len(),
            current,
            next
        );

        if (next - current).abs() > f32::EPSILON {
            self.estimate.current_bpm = next;
            Some(next)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.estimate.current_bpm = self.default_bpm;
        self.estimate.interval_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beats(start: f64, interval: f64, count: usize) -> Vec<f64> {
        (0..count).map(|i| start + interval * i as f64).collect()
    }

    #[test]
    fn holds_default_without_enough_intervals() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 120.0, 0.1, 8);
        assert_eq!(estimator.update(Vec::<f64>::new()), None);
        assert_eq!(estimator.update(vec![1.0, 1.4]), None);
        assert_eq!(estimator.current_bpm(), 120.0);
    }

    #[test]
    fn converges_on_steady_beats() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 100.0, 1.0, 8);
        let bpm = estimator.update(beats(0.0, 0.5, 5)).expect("tempo moves");
        assert!((bpm - 120.0).abs() < 1e-3);
    }

    #[test]
    fn median_ignores_outliers() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 90.0, 1.0, 8);
        // one 240 BPM gap among 120 BPM gaps
        estimator.update(vec![0.0, 0.5, 1.0, 1.25, 1.75, 2.25]);
        assert!((estimator.current_bpm() - 120.0).abs() < 1e-3);
    }

    #[test]
    fn discards_implausible_gaps() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 90.0, 1.0, 8);
        // 0.1s and 3.0s gaps are noise; the two 0.6s gaps remain
        estimator.update(vec![0.0, 0.1, 3.1, 3.7, 4.3]);
        assert_eq!(estimator.estimate().interval_history.len(), 2);
        assert!((estimator.current_bpm() - 100.0).abs() < 1e-2);
    }

    #[test]
    fn clamps_to_range() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 120.0, 1.0, 8);
        estimator.update(beats(0.0, 0.25, 6));
        assert_eq!(estimator.current_bpm(), 200.0);

        estimator.update(beats(0.0, 1.5, 4));
        assert_eq!(estimator.current_bpm(), 60.0);
    }

    #[test]
    fn blends_toward_target() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 120.0, 0.1, 8);
        let bpm = estimator.update(beats(0.0, 0.6, 4)).expect("tempo moves");
        assert!((bpm - 118.0).abs() < 1e-3);
    }

    #[test]
    fn interval_history_is_bounded() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 120.0, 0.1, 4);
        estimator.update(beats(0.0, 0.5, 12));
        assert_eq!(estimator.estimate().interval_history.len(), 4);
    }

    #[test]
    fn reset_restores_default() {
        let mut estimator = BpmEstimator::new(60.0, 200.0, 120.0, 1.0, 8);
        estimator.update(beats(0.0, 0.4, 5));
        assert_ne!(estimator.current_bpm(), 120.0);
        estimator.reset();
        assert_eq!(estimator.current_bpm(), 120.0);
        assert!(estimator.estimate().interval_history.is_empty());
    }
}
