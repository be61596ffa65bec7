//! Time-of-day baselines
//!
//! Window samples are grouped into UTC hour buckets `hour / hour_granularity`.
//! A sample is scored only against the samples sharing its bucket, so traffic
//! that is normal mid-afternoon can still be flagged at night.

use super::statistical::{z_verdict, WindowStats};
use super::Verdict;
use crate::models::{AnomalyCategory, Sample};

const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_HOUR: i64 = 3_600;

#[derive(Debug, Clone)]
pub struct TimeAwareDetector {
    pub z_threshold: f64,
    pub hour_granularity: u32,
    /// Bucket points required before scoring
    pub min_bucket_history: usize,
}

impl TimeAwareDetector {
    pub fn new(z_threshold: f64, hour_granularity: u32, min_bucket_history: usize) -> Self {
        Self {
            z_threshold,
            hour_granularity: hour_granularity.clamp(1, 24),
            min_bucket_history: min_bucket_history.max(2),
        }
    }

    /// Bucket index of a timestamp
    pub fn bucket(&self, timestamp: i64) -> u32 {
        let hour = timestamp.rem_euclid(SECONDS_PER_DAY) / SECONDS_PER_HOUR;
        hour as u32 / self.hour_granularity
    }

    pub fn detect(&self, sample: &Sample, window: &[Sample]) -> Verdict {
        let bucket = self.bucket(sample.timestamp);
        let peers: Vec<f64> = window
            .iter()
            .filter(|s| self.bucket(s.timestamp) == bucket)
            .map(|s| s.value)
            .collect();

        if peers.len() < self.min_bucket_history {
            return Verdict::abstain();
        }
        match WindowStats::from_values(peers) {
            Some(stats) => z_verdict(
                stats.z_score(sample.value),
                self.z_threshold,
                AnomalyCategory::TimePattern,
            ),
            None => Verdict::abstain(),
        }
    }
}
