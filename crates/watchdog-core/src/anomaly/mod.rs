//! Anomaly detection for sampled traffic rates
//!
//! This module provides:
//! - Threshold and single-sample spike detection
//! - Z-score detection against the recent window
//! - Z-score detection against a time-of-day baseline
//! - Trend detection over the newest points
//! - The detection manager combining their verdicts into anomaly events
//!
//! Every detector is a pure function of the new sample and the window of
//! samples that precede it.

mod history;
mod manager;
mod statistical;
mod threshold;
mod time_aware;
mod trend;

pub use history::{AnomalyHistory, AnomalyReport};
pub use manager::DetectionManager;
pub use statistical::{StatisticalDetector, WindowStats, MIN_SAMPLES_FOR_DETECTION, STD_DEV_FLOOR};
pub use threshold::ThresholdDetector;
pub use time_aware::TimeAwareDetector;
pub use trend::TrendDetector;

use crate::models::{AnomalyCategory, Sample};
use std::fmt;

/// Outcome of one detector for one sample
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub anomalous: bool,
    /// 0..1
    pub score: f64,
    /// Categories that fired; empty when not anomalous
    pub categories: Vec<AnomalyCategory>,
}

impl Verdict {
    /// Not enough history to judge
    pub fn abstain() -> Self {
        Self {
            anomalous: false,
            score: 0.0,
            categories: Vec::new(),
        }
    }

    pub fn normal(score: f64) -> Self {
        Self {
            anomalous: false,
            score: score.clamp(0.0, 1.0),
            categories: Vec::new(),
        }
    }

    pub fn flagged(score: f64, categories: Vec<AnomalyCategory>) -> Self {
        Self {
            anomalous: true,
            score: score.clamp(0.0, 1.0),
            categories,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Threshold,
    Statistical,
    TimeAware,
    Trend,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorKind::Threshold => "threshold",
            DetectorKind::Statistical => "statistical",
            DetectorKind::TimeAware => "time_aware",
            DetectorKind::Trend => "trend",
        };
        f.write_str(name)
    }
}

/// The closed set of detectors run by the manager
#[derive(Debug, Clone)]
pub enum Detector {
    Threshold(ThresholdDetector),
    Statistical(StatisticalDetector),
    TimeAware(TimeAwareDetector),
    Trend(TrendDetector),
}

impl Detector {
    pub fn kind(&self) -> DetectorKind {
        match self {
            Detector::Threshold(_) => DetectorKind::Threshold,
            Detector::Statistical(_) => DetectorKind::Statistical,
            Detector::TimeAware(_) => DetectorKind::TimeAware,
            Detector::Trend(_) => DetectorKind::Trend,
        }
    }

    /// Score `sample` against `window`, the samples preceding it, oldest first
    pub fn detect(&self, sample: &Sample, window: &[Sample]) -> Verdict {
        match self {
            Detector::Threshold(d) => d.detect(sample, window),
            Detector::Statistical(d) => d.detect(sample, window),
            Detector::TimeAware(d) => d.detect(sample, window),
            Detector::Trend(d) => d.detect(sample, window),
        }
    }
}

/// Score for a value `ratio` times past its limit: 0.5 at the limit, 1.0 at twice it
pub(crate) fn excess_score(ratio: f64) -> f64 {
    if !ratio.is_finite() {
        return 1.0;
    }
    (0.5 + 0.5 * (ratio - 1.0)).clamp(0.0, 1.0)
}
