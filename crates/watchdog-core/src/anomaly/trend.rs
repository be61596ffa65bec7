//! Trend detection
//!
//! Fits a least-squares line over the newest points by position and
//! normalises the slope by the window's range per step, giving a trend
//! coefficient in -1..1.

use super::Verdict;
use crate::models::{AnomalyCategory, Sample};

#[derive(Debug, Clone)]
pub struct TrendDetector {
    pub trend_threshold: f64,
    /// Points fitted, current sample included
    pub trend_window: usize,
}

impl TrendDetector {
    pub fn new(trend_threshold: f64, trend_window: usize) -> Self {
        Self {
            trend_threshold,
            trend_window: trend_window.max(2),
        }
    }

    pub fn detect(&self, sample: &Sample, window: &[Sample]) -> Verdict {
        let preceding = self.trend_window - 1;
        if window.len() < preceding {
            return Verdict::abstain();
        }

        let values: Vec<f64> = window[window.len() - preceding..]
            .iter()
            .map(|s| s.value)
            .chain(std::iter::once(sample.value))
            .collect();
        let trend = trend_coefficient(&values);

        if trend.abs() <= self.trend_threshold {
            return Verdict::normal(0.0);
        }
        let category = if trend > 0.0 {
            AnomalyCategory::IncreasingTrend
        } else {
            AnomalyCategory::DecreasingTrend
        };
        Verdict::flagged((trend.abs() / self.trend_threshold).min(1.0), vec![category])
    }
}

/// Normalised least-squares slope of `values` against their index
pub fn trend_coefficient(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    let slope = numerator / denominator;

    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max_slope = (max - min) / (n - 1) as f64;
    if max_slope.abs() < f64::EPSILON {
        return 0.0;
    }

    (slope / max_slope).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: impl IntoIterator<Item = f64>) -> Vec<Sample> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| Sample::new(i as i64, v))
            .collect()
    }

    #[test]
    fn test_increasing_sequence() {
        let detector = TrendDetector::new(0.2, 10);
        let window = series((1..=20).map(f64::from));
        let verdict = detector.detect(&Sample::new(20, 21.0), &window);
        assert!(verdict.anomalous);
        assert_eq!(verdict.categories, vec![AnomalyCategory::IncreasingTrend]);
        assert_eq!(verdict.score, 1.0);
    }

    #[test]
    fn test_decreasing_sequence() {
        let detector = TrendDetector::new(0.2, 10);
        let window = series((0..9).map(|i| 100.0 - 3.0 * i as f64));
        let verdict = detector.detect(&Sample::new(9, 70.0), &window);
        assert_eq!(verdict.categories, vec![AnomalyCategory::DecreasingTrend]);
    }

    #[test]
    fn test_flat_sequence_has_no_trend() {
        let detector = TrendDetector::new(0.2, 10);
        let window = series(std::iter::repeat(7.0).take(12));
        let verdict = detector.detect(&Sample::new(12, 7.0), &window);
        assert!(!verdict.anomalous);
        assert!(verdict.categories.is_empty());
    }

    #[test]
    fn test_symmetric_sequence_has_no_trend() {
        let values = [5.0, 1.0, 9.0, 1.0, 9.0, 9.0, 1.0, 9.0, 1.0, 5.0];
        assert!(trend_coefficient(&values).abs() < 1e-9);
    }

    #[test]
    fn test_abstains_on_short_window() {
        let detector = TrendDetector::new(0.2, 10);
        let window = series((0..8).map(f64::from));
        assert_eq!(detector.detect(&Sample::new(8, 8.0), &window), Verdict::abstain());
    }
}
