//! Detection manager
//!
//! Runs every detector for a key's new sample and combines the ones that
//! fired into a single scored event:
//!
//! `combined = sensitivity * Σ(wᵢ·sᵢ) / Σ(wᵢ)` over fired detectors, clamped to 1.
//!
//! An event is emitted when `combined` exceeds the manager threshold, or when
//! enough detectors agree if a consensus count is configured. Its category set
//! lists everything that fired, whatever each detector scored.

use super::{
    AnomalyHistory, Detector, StatisticalDetector, ThresholdDetector, TimeAwareDetector,
    TrendDetector,
};
use crate::config::DetectorConfig;
use crate::models::{AnomalyCategory, AnomalyEvent, Sample, Severity};
use std::collections::BTreeSet;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct DetectionManager {
    key: String,
    detectors: Vec<(Detector, f64)>,
    sensitivity: f64,
    threshold: f64,
    consensus_count: Option<usize>,
    min_history: usize,
    history: AnomalyHistory,
}

impl DetectionManager {
    /// Manager running all four detectors for one key
    pub fn new(key: impl Into<String>, max_value: f64, config: &DetectorConfig) -> Self {
        let weights = &config.weights;
        let detectors = vec![
            (
                Detector::Threshold(ThresholdDetector::new(max_value, config.spike_sensitivity)),
                weights.threshold,
            ),
            (
                Detector::Statistical(
                    StatisticalDetector::new(config.z_threshold).with_min_history(config.min_history),
                ),
                weights.statistical,
            ),
            (
                Detector::TimeAware(TimeAwareDetector::new(
                    config.z_threshold,
                    config.hour_granularity,
                    config.min_bucket_history,
                )),
                weights.time_aware,
            ),
            (
                Detector::Trend(TrendDetector::new(config.trend_threshold, config.trend_window)),
                weights.trend,
            ),
        ];

        Self::with_detectors(key, detectors, config)
    }

    /// Manager over an explicit detector list with per-detector weights
    pub fn with_detectors(
        key: impl Into<String>,
        detectors: Vec<(Detector, f64)>,
        config: &DetectorConfig,
    ) -> Self {
        Self {
            key: key.into(),
            detectors,
            sensitivity: config.sensitivity,
            threshold: config.manager_threshold,
            consensus_count: config.consensus_count,
            min_history: config.min_history.max(2),
            history: AnomalyHistory::new(config.history_capacity),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn history(&self) -> &AnomalyHistory {
        &self.history
    }

    /// Whether a window of `window_len` samples is enough for the
    /// history-based detectors to score; before that only the threshold
    /// path can fire
    pub fn is_warm(&self, window_len: usize) -> bool {
        window_len >= self.min_history
    }

    /// Score `sample` against the window preceding it
    ///
    /// Emitted events are also appended to the key's anomaly history.
    pub fn evaluate(&mut self, sample: &Sample, window: &[Sample]) -> Option<AnomalyEvent> {
        let mut triggered: BTreeSet<AnomalyCategory> = BTreeSet::new();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut fired = 0usize;

        for (detector, weight) in &self.detectors {
            let verdict = detector.detect(sample, window);
            trace!(
                key = %self.key,
                detector = %detector.kind(),
                anomalous = verdict.anomalous,
                score = verdict.score,
                "Detector verdict"
            );
            if !verdict.anomalous {
                continue;
            }
            fired += 1;
            triggered.extend(verdict.categories.iter().copied());
            weighted += weight * verdict.score;
            total_weight += weight;
        }

        if fired == 0 {
            return None;
        }

        let combined = if total_weight > 0.0 {
            (self.sensitivity * weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let consensus = self.consensus_count.is_some_and(|needed| fired >= needed);
        if combined <= self.threshold && !consensus {
            return None;
        }

        let event = AnomalyEvent {
            timestamp: sample.timestamp,
            key: self.key.clone(),
            value: sample.value,
            triggered_types: triggered,
            confidence_score: combined,
            severity: Severity::from_score(combined),
        };
        self.history.record(event.clone());
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady_window(len: usize, value: f64) -> Vec<Sample> {
        (0..len)
            .map(|i| Sample::new(1_700_000_000 + i as i64, value))
            .collect()
    }

    #[test]
    fn test_quiet_sample_emits_nothing() {
        let mut manager = DetectionManager::new("total:s", 20.0, &DetectorConfig::default());
        let window = steady_window(60, 5.0);
        assert!(manager.evaluate(&Sample::new(1_700_000_060, 5.0), &window).is_none());
        assert!(manager.history().is_empty());
    }

    #[test]
    fn test_flood_emits_combined_event() {
        let mut manager = DetectionManager::new("total:s", 20.0, &DetectorConfig::default());
        let window = steady_window(60, 5.0);
        let event = manager
            .evaluate(&Sample::new(1_700_000_060, 80.0), &window)
            .expect("flood should be flagged");

        assert!(event.triggered_types.contains(&AnomalyCategory::Threshold));
        assert!(event.triggered_types.contains(&AnomalyCategory::Spike));
        assert!(event.triggered_types.contains(&AnomalyCategory::Statistical));
        assert!(event.confidence_score > 0.5);
        assert_eq!(event.severity, Severity::from_score(event.confidence_score));
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn test_low_score_suppressed_unless_consensus() {
        let detectors = vec![(Detector::Threshold(ThresholdDetector::new(20.0, 2.0)), 1.0)];
        let window = steady_window(5, 19.0);
        // 21 against a max of 20 scores 0.525
        let sample = Sample::new(1_700_000_100, 21.0);

        let mut strict = DetectionManager::with_detectors(
            "total:s",
            detectors.clone(),
            &DetectorConfig {
                manager_threshold: 0.6,
                ..DetectorConfig::default()
            },
        );
        assert!(strict.evaluate(&sample, &window).is_none());

        let mut consensus = DetectionManager::with_detectors(
            "total:s",
            detectors,
            &DetectorConfig {
                manager_threshold: 0.9,
                consensus_count: Some(1),
                ..DetectorConfig::default()
            },
        );
        let event = consensus
            .evaluate(&sample, &window)
            .expect("one detector meets a consensus of one");
        assert!((event.confidence_score - 0.525).abs() < 1e-9);
        assert_eq!(event.severity, Severity::Medium);
    }

    #[test]
    fn test_weights_and_sensitivity() {
        let detectors = vec![
            (Detector::Threshold(ThresholdDetector::new(20.0, 10.0)), 3.0),
            (Detector::Trend(TrendDetector::new(0.2, 3)), 1.0),
        ];
        let config = DetectorConfig {
            sensitivity: 0.5,
            manager_threshold: 0.1,
            ..DetectorConfig::default()
        };
        let mut manager = DetectionManager::with_detectors("total:s", detectors, &config);
        let window = vec![Sample::new(0, 18.0), Sample::new(1, 19.0)];

        // threshold: 30 / 20 -> 0.75; trend: monotonic -> 1.0
        let event = manager.evaluate(&Sample::new(2, 30.0), &window).unwrap();
        let expected = 0.5 * (3.0 * 0.75 + 1.0 * 1.0) / 4.0;
        assert!((event.confidence_score - expected).abs() < 1e-9);
        assert_eq!(
            event.triggered_types,
            [AnomalyCategory::Threshold, AnomalyCategory::IncreasingTrend]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_warm_after_min_history() {
        let config = DetectorConfig {
            min_history: 10,
            ..DetectorConfig::default()
        };
        let manager = DetectionManager::new("total:s", 20.0, &config);
        assert!(!manager.is_warm(0));
        assert!(!manager.is_warm(9));
        assert!(manager.is_warm(10));
    }
}
