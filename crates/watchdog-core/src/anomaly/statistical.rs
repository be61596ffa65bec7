//! Z-score detection
//!
//! Scores a sample against the mean and sample standard deviation of the
//! window preceding it.

use super::Verdict;
use crate::models::{AnomalyCategory, Sample};

/// Minimum window points required for statistical detection
pub const MIN_SAMPLES_FOR_DETECTION: usize = 10;

/// Lower bound on the standard deviation, so flat windows still score
pub const STD_DEV_FLOOR: f64 = 0.1;

/// Mean and spread of a set of values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    /// Sample standard deviation, floored at [`STD_DEV_FLOOR`]
    pub std_dev: f64,
    pub count: usize,
}

impl WindowStats {
    /// Compute over `values`; `None` when empty
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;

        // Two-pass sample variance (Bessel's correction)
        let std_dev = if count > 1 {
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            mean,
            std_dev: std_dev.max(STD_DEV_FLOOR),
            count,
        })
    }

    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev
    }
}

/// Verdict for a z-score against `threshold`; confidence saturates at twice the threshold
pub(crate) fn z_verdict(z: f64, threshold: f64, category: AnomalyCategory) -> Verdict {
    let score = (z.abs() / (threshold * 2.0)).min(1.0);
    if z.abs() > threshold {
        Verdict::flagged(score, vec![category])
    } else {
        Verdict::normal(score)
    }
}

#[derive(Debug, Clone)]
pub struct StatisticalDetector {
    pub z_threshold: f64,
    pub min_history: usize,
}

impl StatisticalDetector {
    pub fn new(z_threshold: f64) -> Self {
        Self {
            z_threshold,
            min_history: MIN_SAMPLES_FOR_DETECTION,
        }
    }

    pub fn with_min_history(mut self, min_history: usize) -> Self {
        self.min_history = min_history.max(2);
        self
    }

    pub fn detect(&self, sample: &Sample, window: &[Sample]) -> Verdict {
        if window.len() < self.min_history {
            return Verdict::abstain();
        }
        match WindowStats::from_values(window.iter().map(|s| s.value)) {
            Some(stats) => z_verdict(
                stats.z_score(sample.value),
                self.z_threshold,
                AnomalyCategory::Statistical,
            ),
            None => Verdict::abstain(),
        }
    }
}

impl Default for StatisticalDetector {
    fn default() -> Self {
        Self::new(3.0)
    }
}
