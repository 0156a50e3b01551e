//! Temporal outlier detection on per-station PSD series.
//!
//! Quartile fences over a rolling window of recent values. The bounds are
//! deliberately asymmetric: a noise-floor rise is routine interference while
//! a drop points at a failing receiver, and a calibrator drop points at a
//! failing beacon or front end.

use crate::util::{Interpolation, percentile};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Days of history a detector warms up over before it may flag anything.
const HISTORY_DAYS: u32 = 20;
const MINUTES_PER_DAY: u32 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Normal,
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationConfig {
    pub noise_quartiles: (f64, f64),
    pub noise_upper_factor: f64,
    pub noise_lower_factor: f64,
    pub calibrator_quartiles: (f64, f64),
    pub calibrator_upper_factor: f64,
    pub calibrator_lower_factor: f64,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            noise_quartiles: (25.0, 75.0),
            noise_upper_factor: 6.0,
            noise_lower_factor: 1.5,
            calibrator_quartiles: (20.0, 80.0),
            calibrator_upper_factor: 2.5,
            calibrator_lower_factor: 2.0,
        }
    }
}

/// Rolling windows of the most recent noise and calibrator PSDs for one
/// station. Missing samples never enter the windows; a verdict other than
/// `Normal` is only possible once a window is full.
#[derive(Debug, Clone)]
pub struct VariationDetector {
    window: usize,
    cfg: VariationConfig,
    noise: VecDeque<f64>,
    calibrator: VecDeque<f64>,
}

impl VariationDetector {
    pub fn new(window: usize, cfg: VariationConfig) -> Self {
        Self {
            window: window.max(1),
            cfg,
            noise: VecDeque::new(),
            calibrator: VecDeque::new(),
        }
    }

    /// Window size for a sampling interval in minutes: twenty days of
    /// samples.
    pub fn window_for_interval(interval_minutes: u32) -> usize {
        (HISTORY_DAYS * MINUTES_PER_DAY).div_ceil(interval_minutes.max(1)) as usize
    }

    pub fn observe_noise(&mut self, value: Option<f64>) -> Verdict {
        let (q, upper, lower) = (
            self.cfg.noise_quartiles,
            self.cfg.noise_upper_factor,
            self.cfg.noise_lower_factor,
        );
        Self::observe(&mut self.noise, self.window, value, q, upper, lower)
    }

    pub fn observe_calibrator(&mut self, value: Option<f64>) -> Verdict {
        let (q, upper, lower) = (
            self.cfg.calibrator_quartiles,
            self.cfg.calibrator_upper_factor,
            self.cfg.calibrator_lower_factor,
        );
        Self::observe(&mut self.calibrator, self.window, value, q, upper, lower)
    }

    fn observe(
        history: &mut VecDeque<f64>,
        window: usize,
        value: Option<f64>,
        quartiles: (f64, f64),
        upper_factor: f64,
        lower_factor: f64,
    ) -> Verdict {
        let Some(value) = value else {
            return Verdict::Normal;
        };

        let verdict = if history.len() >= window {
            let values: Vec<f64> = history.iter().copied().collect();
            let q1 = percentile(&values, quartiles.0, Interpolation::Lower);
            let q3 = percentile(&values, quartiles.1, Interpolation::Higher);
            let iqr = q3 - q1;
            if value >= q3 + upper_factor * iqr {
                Verdict::Increase
            } else if value <= q1 - lower_factor * iqr || value <= 0.0 {
                Verdict::Decrease
            } else {
                Verdict::Normal
            }
        } else {
            Verdict::Normal
        };

        history.push_back(value);
        while history.len() > window {
            history.pop_front();
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warmed(window: usize) -> VariationDetector {
        let mut detector = VariationDetector::new(window, VariationConfig::default());
        for v in 0..window {
            // 91, 92, ... ascending around 100
            let value = 91.0 + v as f64;
            assert_eq!(detector.observe_noise(Some(value)), Verdict::Normal);
            assert_eq!(detector.observe_calibrator(Some(value)), Verdict::Normal);
        }
        detector
    }

    #[test]
    fn daily_interval_window_covers_twenty_days() {
        assert_eq!(VariationDetector::window_for_interval(1440), 20);
        assert_eq!(VariationDetector::window_for_interval(60), 480);
        assert_eq!(VariationDetector::window_for_interval(7), 4115);
    }

    #[test]
    fn silent_until_the_window_fills() {
        let mut detector = VariationDetector::new(10, VariationConfig::default());
        for _ in 0..9 {
            assert_eq!(detector.observe_noise(Some(100.0)), Verdict::Normal);
        }
        // Even wild values stay unflagged before the tenth sample.
        assert_eq!(detector.observe_noise(Some(1e9)), Verdict::Normal);
        assert_eq!(detector.observe_noise(Some(-5.0)), Verdict::Decrease);
    }

    #[test]
    fn twenty_days_then_a_spike_flags_one_increase() {
        let mut detector = warmed(20);
        assert_eq!(detector.observe_noise(Some(200.0)), Verdict::Increase);
        // Back to nominal values afterwards; the spike sits in the window
        // but nothing new is flagged.
        assert_eq!(detector.observe_noise(Some(101.0)), Verdict::Normal);
        assert_eq!(detector.observe_noise(Some(99.0)), Verdict::Normal);
    }

    #[test]
    fn fences_are_asymmetric_between_noise_and_calibrator() {
        // With history 91..=110: noise fences are Q3(75, higher) + 6*IQR =
        // 172 and Q1(25, lower) - 1.5*IQR = 78.5; calibrator fences are
        // 139.5 and 68.
        let mut detector = warmed(20);
        assert_eq!(detector.observe_noise(Some(150.0)), Verdict::Normal);
        assert_eq!(detector.observe_calibrator(Some(150.0)), Verdict::Increase);

        let mut detector = warmed(20);
        assert_eq!(detector.observe_noise(Some(70.0)), Verdict::Decrease);
        assert_eq!(detector.observe_calibrator(Some(70.0)), Verdict::Normal);
    }

    #[test]
    fn nonpositive_values_are_decreases_once_warm() {
        let mut detector = warmed(20);
        assert_eq!(detector.observe_noise(Some(0.0)), Verdict::Decrease);
        let mut detector = warmed(20);
        assert_eq!(detector.observe_calibrator(Some(-1.0)), Verdict::Decrease);
    }

    #[test]
    fn retention_evicts_the_oldest_values() {
        let mut detector = VariationDetector::new(3, VariationConfig::default());
        for v in [1.0, 2.0, 3.0] {
            detector.observe_noise(Some(v));
        }
        // Fill the window with large values; the early 1..3 must age out.
        for _ in 0..3 {
            detector.observe_noise(Some(100.0));
        }
        // Against a window of pure 100s the IQR is zero, so 99 is a
        // decrease; it would be normal if 1..3 still counted.
        assert_eq!(detector.observe_noise(Some(99.0)), Verdict::Decrease);
    }

    #[test]
    fn missing_samples_do_not_enter_the_window() {
        let mut detector = VariationDetector::new(3, VariationConfig::default());
        detector.observe_noise(Some(10.0));
        detector.observe_noise(None);
        detector.observe_noise(Some(10.0));
        detector.observe_noise(Some(10.0));
        // Window is exactly full now; the next outlier is flagged.
        assert_eq!(detector.observe_noise(Some(1000.0)), Verdict::Increase);
    }
}
