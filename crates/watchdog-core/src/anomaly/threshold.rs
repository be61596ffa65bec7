//! Absolute threshold and spike detection
//!
//! The threshold path fires for any single sample above the key's maximum;
//! how long it must persist is the scheduler's concern. The spike path fires
//! when a sample jumps past a multiple of the preceding few samples' average.

use super::{excess_score, Verdict};
use crate::models::{AnomalyCategory, Sample};

/// Preceding samples averaged by the spike path
const SPIKE_LOOKBACK: usize = 4;

/// Minimum preceding samples for the spike path
const SPIKE_MIN_HISTORY: usize = 2;

/// Spikes must also reach this fraction of the maximum
const SPIKE_FLOOR_FRACTION: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    pub max_value: f64,
    pub spike_sensitivity: f64,
}

impl ThresholdDetector {
    pub fn new(max_value: f64, spike_sensitivity: f64) -> Self {
        Self {
            max_value,
            spike_sensitivity,
        }
    }

    pub fn detect(&self, sample: &Sample, window: &[Sample]) -> Verdict {
        let value = sample.value;
        let mut categories = Vec::new();
        let mut score: f64 = 0.0;

        if value > self.max_value {
            categories.push(AnomalyCategory::Threshold);
            let ratio = if self.max_value > 0.0 {
                value / self.max_value
            } else {
                f64::INFINITY
            };
            score = score.max(excess_score(ratio));
        }

        if let Some(spike_score) = self.spike_score(value, window) {
            categories.push(AnomalyCategory::Spike);
            score = score.max(spike_score);
        }

        if categories.is_empty() {
            Verdict::normal(0.0)
        } else {
            Verdict::flagged(score, categories)
        }
    }

    fn spike_score(&self, value: f64, window: &[Sample]) -> Option<f64> {
        if window.len() < SPIKE_MIN_HISTORY {
            return None;
        }
        let recent = &window[window.len().saturating_sub(SPIKE_LOOKBACK)..];
        let average = recent.iter().map(|s| s.value).sum::<f64>() / recent.len() as f64;
        let limit = average * self.spike_sensitivity;

        if value > limit && value > self.max_value * SPIKE_FLOOR_FRACTION {
            let ratio = if limit > 0.0 { value / limit } else { f64::INFINITY };
            Some(excess_score(ratio))
        } else {
            None
        }
    }
}
