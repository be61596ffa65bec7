//! Configuration schema consumed by the watchdog core
//!
//! Loading from files and the environment is left to the binary. This module
//! owns:
//! - defaults for every option
//! - the legacy comma-separated entry formats for thresholds and retention
//! - range validation, split into fatal (global) and per-key errors

use crate::models::ThresholdConfig;
use crate::storage::{AggregationFunction, CompressionConfig, RetentionPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{option} = {value} is outside the allowed range {min}..={max}")]
    OutOfRange {
        option: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid threshold entry '{entry}': {reason}")]
    InvalidThreshold { entry: String, reason: String },

    #[error("invalid retention entry '{entry}': {reason}")]
    InvalidRetention { entry: String, reason: String },

    #[error("no valid rate thresholds configured")]
    NoThresholds,
}

fn check_range(option: &'static str, value: f64, range: RangeInclusive<f64>) -> Result<(), ConfigError> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            option,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

/// Relative weight of each detector in the combined score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorWeights {
    pub threshold: f64,
    pub statistical: f64,
    pub time_aware: f64,
    pub trend: f64,
}

impl Default for DetectorWeights {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            statistical: 1.0,
            time_aware: 1.0,
            trend: 1.0,
        }
    }
}

/// Tuning shared by every detector instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Multiplier on the combined score
    pub sensitivity: f64,
    /// Multiplier over the recent average for the spike path
    pub spike_sensitivity: f64,
    pub z_threshold: f64,
    /// Normalised slope cutoff, 0..1
    pub trend_threshold: f64,
    /// Width of time-of-day buckets in hours
    pub hour_granularity: u32,
    /// Points fitted by the trend detector, current sample included
    pub trend_window: usize,
    /// Window points required before statistical scoring
    pub min_history: usize,
    /// Bucket points required before time-aware scoring
    pub min_bucket_history: usize,
    pub weights: DetectorWeights,
    /// Combined score an event must exceed
    pub manager_threshold: f64,
    /// Also emit when at least this many detectors fire
    pub consensus_count: Option<usize>,
    /// Per-key anomaly history length
    pub history_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            spike_sensitivity: 2.0,
            z_threshold: 3.0,
            trend_threshold: 0.2,
            hour_granularity: 1,
            trend_window: 10,
            min_history: 10,
            min_bucket_history: 3,
            weights: DetectorWeights::default(),
            manager_threshold: 0.5,
            consensus_count: None,
            history_capacity: 100,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("sensitivity", self.sensitivity, 0.1..=10.0)?;
        check_range("spike_sensitivity", self.spike_sensitivity, 1.0..=10.0)?;
        check_range("z_threshold", self.z_threshold, 1.0..=10.0)?;
        check_range("trend_threshold", self.trend_threshold, 0.05..=1.0)?;
        check_range("hour_granularity", self.hour_granularity as f64, 1.0..=12.0)?;
        check_range("trend_window", self.trend_window as f64, 2.0..=1000.0)?;
        check_range("manager_threshold", self.manager_threshold, 0.0..=1.0)?;
        check_range("history_capacity", self.history_capacity as f64, 1.0..=100_000.0)?;
        for (option, weight) in [
            ("weights.threshold", self.weights.threshold),
            ("weights.statistical", self.weights.statistical),
            ("weights.time_aware", self.weights.time_aware),
            ("weights.trend", self.weights.trend),
        ] {
            check_range(option, weight, 0.0..=100.0)?;
        }
        Ok(())
    }
}

/// A per-metric entry, either a table or the legacy
/// `"key, interval, max_value, duration[, reset_duration]"` line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdEntry {
    Line(String),
    Rule(ThresholdConfig),
}

impl ThresholdEntry {
    /// Parse and validate into a rule
    pub fn resolve(&self) -> Result<ThresholdConfig, ConfigError> {
        let config = match self {
            ThresholdEntry::Line(line) => line.parse::<ThresholdConfig>()?,
            ThresholdEntry::Rule(rule) => rule.clone(),
        };
        validate_threshold(&config)?;
        Ok(config)
    }
}

impl FromStr for ThresholdConfig {
    type Err = ConfigError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidThreshold {
            entry: line.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if !(4..=5).contains(&parts.len()) {
            return Err(invalid("expected 'key, interval, max_value, duration'"));
        }

        let interval = parts[1]
            .parse::<u64>()
            .map_err(|_| invalid("interval must be a whole number of seconds"))?;
        let max_value = parts[2]
            .parse::<f64>()
            .map_err(|_| invalid("max_value must be a number"))?;
        let duration = parts[3]
            .parse::<u32>()
            .map_err(|_| invalid("duration must be a whole number of samples"))?;

        let mut config = ThresholdConfig::new(parts[0], interval, max_value, duration);
        if let Some(reset) = parts.get(4) {
            config.reset_duration = reset
                .parse::<u32>()
                .map_err(|_| invalid("reset_duration must be a whole number of samples"))?;
        }
        Ok(config)
    }
}

/// Check a single rule for values the scheduler cannot run
pub fn validate_threshold(config: &ThresholdConfig) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidThreshold {
        entry: config.monitored_key.clone(),
        reason: reason.to_string(),
    };
    if config.monitored_key.trim().is_empty() {
        return Err(invalid("monitored key is empty"));
    }
    if config.sample_interval_seconds == 0 {
        return Err(invalid("interval must be positive"));
    }
    if !config.max_value.is_finite() || config.max_value < 0.0 {
        return Err(invalid("max_value must be a non-negative number"));
    }
    if config.consecutive_duration == 0 {
        return Err(invalid("duration must be at least one sample"));
    }
    if config.reset_duration == 0 {
        return Err(invalid("reset_duration must be at least one sample"));
    }
    if config.max_samples == Some(0) {
        return Err(invalid("max_samples must be positive"));
    }
    Ok(())
}

/// Rate monitoring options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateMonitoringConfig {
    /// Global re-scan period in milliseconds
    #[serde(alias = "scan_interval")]
    pub scan_interval_ms: u64,
    pub use_enhanced_detection: bool,
    /// Window points handed to detectors
    pub window_size: usize,
    /// Counter source read timeout in milliseconds
    pub source_timeout_ms: u64,
    /// Time allowed for in-flight ticks at shutdown
    pub shutdown_grace_secs: u64,
    pub thresholds: Vec<ThresholdEntry>,
}

impl Default for RateMonitoringConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 10_000,
            use_enhanced_detection: false,
            window_size: 500,
            source_timeout_ms: 1_000,
            shutdown_grace_secs: 5,
            thresholds: Vec::new(),
        }
    }
}

impl RateMonitoringConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// A retention entry, either a table or the legacy
/// `"pattern, raw_hours, resolution_seconds, function[, archive_hours]"` line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetentionEntry {
    Line(String),
    Rule(RetentionPolicyConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicyConfig {
    pub key_pattern: String,
    pub raw_hours: f64,
    pub resolution_seconds: u64,
    pub aggregation_function: AggregationFunction,
    /// Defaults to 30 days
    #[serde(default)]
    pub archive_hours: Option<f64>,
}

const DEFAULT_ARCHIVE_HOURS: f64 = 720.0;

impl FromStr for RetentionPolicyConfig {
    type Err = ConfigError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidRetention {
            entry: line.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if !(4..=5).contains(&parts.len()) {
            return Err(invalid(
                "expected 'pattern, raw_hours, resolution_seconds, function'",
            ));
        }

        let archive_hours = match parts.get(4) {
            Some(raw) => Some(
                raw.parse::<f64>()
                    .map_err(|_| invalid("archive_hours must be a number"))?,
            ),
            None => None,
        };

        Ok(Self {
            key_pattern: parts[0].to_string(),
            raw_hours: parts[1]
                .parse()
                .map_err(|_| invalid("raw_hours must be a number"))?,
            resolution_seconds: parts[2]
                .parse()
                .map_err(|_| invalid("resolution_seconds must be a whole number"))?,
            aggregation_function: parts[3]
                .parse()
                .map_err(|_| invalid("unknown aggregation function"))?,
            archive_hours,
        })
    }
}

impl RetentionPolicyConfig {
    /// Validate and compile into a policy
    pub fn build(&self) -> Result<RetentionPolicy, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRetention {
            entry: self.key_pattern.clone(),
            reason: reason.to_string(),
        };
        if self.key_pattern.trim().is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if !self.raw_hours.is_finite() || self.raw_hours <= 0.0 {
            return Err(invalid("raw_hours must be positive"));
        }
        if self.resolution_seconds == 0 {
            return Err(invalid("resolution_seconds must be positive"));
        }
        let archive_hours = self.archive_hours.unwrap_or(DEFAULT_ARCHIVE_HOURS);
        if !archive_hours.is_finite() || archive_hours < self.raw_hours {
            return Err(invalid("archive_hours must be at least raw_hours"));
        }

        let raw_retention =
            hours_to_duration(self.raw_hours).ok_or_else(|| invalid("raw_hours is too large"))?;
        let archive_retention =
            hours_to_duration(archive_hours).ok_or_else(|| invalid("archive_hours is too large"))?;

        RetentionPolicy::new(
            &self.key_pattern,
            raw_retention,
            Duration::from_secs(self.resolution_seconds),
            self.aggregation_function,
            archive_retention,
        )
    }
}

/// Retention spans must fit signed epoch-second arithmetic
fn hours_to_duration(hours: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(hours * 3600.0)
        .ok()
        .filter(|d| d.as_secs() <= i64::MAX as u64)
}

impl RetentionEntry {
    pub fn resolve(&self) -> Result<RetentionPolicy, ConfigError> {
        match self {
            RetentionEntry::Line(line) => line.parse::<RetentionPolicyConfig>()?.build(),
            RetentionEntry::Rule(rule) => rule.build(),
        }
    }
}

/// Storage engine options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub compression_enabled: bool,
    pub compression_level: u32,
    /// Blocks at or below this many bytes are stored raw
    pub min_compression_size: usize,
    /// Aggregate buckets per stored block
    pub aggregate_block_size: usize,
    pub operation_timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    #[serde(alias = "cleanup_interval_seconds")]
    pub sweep_interval_secs: u64,
    pub retention: Vec<RetentionEntry>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression_enabled: true,
            compression_level: 6,
            min_compression_size: 100,
            aggregate_block_size: 128,
            operation_timeout_ms: 2_000,
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            sweep_interval_secs: 3_600,
            retention: Vec::new(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("compression_level", self.compression_level as f64, 1.0..=9.0)?;
        check_range(
            "min_compression_size",
            self.min_compression_size as f64,
            50.0..=10_000.0,
        )?;
        check_range(
            "sweep_interval_secs",
            self.sweep_interval_secs as f64,
            300.0..=86_400.0,
        )?;
        check_range(
            "aggregate_block_size",
            self.aggregate_block_size as f64,
            1.0..=100_000.0,
        )?;
        check_range(
            "operation_timeout_ms",
            self.operation_timeout_ms as f64,
            1.0..=600_000.0,
        )?;
        self.retention_policies().map(|_| ())
    }

    pub fn compression(&self) -> CompressionConfig {
        CompressionConfig {
            enabled: self.compression_enabled,
            level: self.compression_level,
            min_size: self.min_compression_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Compiled policies, falling back to the built-in tiers when none are configured
    pub fn retention_policies(&self) -> Result<Vec<RetentionPolicy>, ConfigError> {
        if self.retention.is_empty() {
            return Ok(RetentionPolicy::defaults());
        }
        self.retention.iter().map(RetentionEntry::resolve).collect()
    }
}

/// Complete configuration of the watchdog core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub rate_monitoring: RateMonitoringConfig,
    pub detection: DetectorConfig,
    pub storage: StorageConfig,
}

impl WatchdogConfig {
    /// Validate global options; any error here is fatal at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "scan_interval_ms",
            self.rate_monitoring.scan_interval_ms as f64,
            1_000.0..=60_000.0,
        )?;
        check_range(
            "window_size",
            self.rate_monitoring.window_size as f64,
            1.0..=100_000.0,
        )?;
        self.detection.validate()?;
        self.storage.validate()
    }

    /// Resolve per-metric entries, returning the usable rules and the rejected ones
    ///
    /// Falls back to `total:s` sampled every second with max 20 over 30 samples
    /// when nothing is configured.
    pub fn threshold_configs(&self) -> (Vec<ThresholdConfig>, Vec<ConfigError>) {
        if self.rate_monitoring.thresholds.is_empty() {
            return (vec![ThresholdConfig::new("total:s", 1, 20.0, 30)], Vec::new());
        }

        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for entry in &self.rate_monitoring.thresholds {
            match entry.resolve() {
                Ok(config) if !seen.insert(config.monitored_key.clone()) => {
                    rejected.push(ConfigError::InvalidThreshold {
                        entry: config.monitored_key,
                        reason: "duplicate monitored key".to_string(),
                    });
                }
                Ok(config) => accepted.push(config),
                Err(e) => rejected.push(e),
            }
        }
        (accepted, rejected)
    }
}
