//! Core data models for the rate watchdog

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Sampling cadence of a monitored key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
}

impl IntervalUnit {
    /// Derive the unit from a key's `:s`/`:m`/`:h` suffix, defaulting to seconds
    pub fn from_key(key: &str) -> Self {
        match key.rsplit_once(':').map(|(_, suffix)| suffix) {
            Some("m") => IntervalUnit::Minute,
            Some("h") => IntervalUnit::Hour,
            _ => IntervalUnit::Second,
        }
    }

    /// Raw capacity used when the configuration does not override it
    pub fn default_capacity(&self) -> usize {
        match self {
            IntervalUnit::Second => 3600,
            IntervalUnit::Minute => 1440,
            IntervalUnit::Hour => 168,
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnit::Second => write!(f, "second"),
            IntervalUnit::Minute => write!(f, "minute"),
            IntervalUnit::Hour => write!(f, "hour"),
        }
    }
}

/// A monitored counter series, immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitoringKey {
    pub id: String,
    pub unit: IntervalUnit,
    /// Hard upper bound on retained raw samples
    pub max_samples: usize,
}

impl MonitoringKey {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let unit = IntervalUnit::from_key(&id);
        Self {
            max_samples: unit.default_capacity(),
            id,
            unit,
        }
    }

    pub fn with_capacity(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(1);
        self
    }
}

impl fmt::Display for MonitoringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// One observation of a counter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch seconds
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Per-metric threshold rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub monitored_key: String,
    pub sample_interval_seconds: u64,
    pub max_value: f64,
    /// Consecutive violating samples before the alarm fires
    pub consecutive_duration: u32,
    /// Consecutive non-violating samples before the alarm clears and re-arms
    #[serde(default = "default_reset_duration")]
    pub reset_duration: u32,
    /// Override for the key's raw capacity
    #[serde(default)]
    pub max_samples: Option<usize>,
}

fn default_reset_duration() -> u32 {
    1
}

impl ThresholdConfig {
    pub fn new(
        monitored_key: impl Into<String>,
        sample_interval_seconds: u64,
        max_value: f64,
        consecutive_duration: u32,
    ) -> Self {
        Self {
            monitored_key: monitored_key.into(),
            sample_interval_seconds,
            max_value,
            consecutive_duration,
            reset_duration: default_reset_duration(),
            max_samples: None,
        }
    }

    pub fn with_reset_duration(mut self, reset_duration: u32) -> Self {
        self.reset_duration = reset_duration;
        self
    }

    /// Build the immutable key this rule samples
    pub fn monitoring_key(&self) -> MonitoringKey {
        let key = MonitoringKey::new(&self.monitored_key);
        match self.max_samples {
            Some(capacity) => key.with_capacity(capacity),
            None => key,
        }
    }
}

/// Category a detector reports when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    Threshold,
    Spike,
    Statistical,
    TimePattern,
    IncreasingTrend,
    DecreasingTrend,
}

impl fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnomalyCategory::Threshold => "threshold",
            AnomalyCategory::Spike => "spike",
            AnomalyCategory::Statistical => "statistical",
            AnomalyCategory::TimePattern => "time_pattern",
            AnomalyCategory::IncreasingTrend => "increasing_trend",
            AnomalyCategory::DecreasingTrend => "decreasing_trend",
        };
        f.write_str(name)
    }
}

/// Discrete severity tier derived from a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Step function: low < 0.4 <= medium < 0.7 <= high < 0.9 <= critical
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Severity::Critical
        } else if score >= 0.7 {
            Severity::High
        } else if score >= 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Combined verdict of the Detection Manager for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub timestamp: i64,
    pub key: String,
    pub value: f64,
    pub triggered_types: BTreeSet<AnomalyCategory>,
    pub confidence_score: f64,
    pub severity: Severity,
}

/// A closed threshold alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPeriod {
    pub start: i64,
    pub end: i64,
}

impl AlarmPeriod {
    pub fn duration_secs(&self) -> i64 {
        self.end - self.start
    }
}
