//! Observability infrastructure for the rate watchdog
//!
//! Provides:
//! - Prometheus metrics (tick latency, storage health, detections, retention)
//! - Structured JSON logging with tracing

use crate::alerting::AlertRecord;
use crate::models::{AlarmPeriod, AnomalyEvent};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchdogMetricsInner> = OnceLock::new();

struct WatchdogMetricsInner {
    tick_latency_seconds: Histogram,
    samples_recorded: IntCounter,
    source_errors: IntCounter,
    storage_errors: IntCounter,
    storage_retries: IntCounter,
    threshold_violations: IntCounter,
    anomalies_detected: IntCounterVec,
    configuration_errors: IntCounter,
    keys_monitored: IntGauge,
    keys_in_alarm: IntGauge,
    retention_sweeps: IntCounter,
    points_aggregated: IntCounter,
    points_removed: IntCounter,
    blocks_compressed: IntCounter,
    compression_bytes_saved: IntCounter,
}

impl WatchdogMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "rate_watchdog_tick_latency_seconds",
                "Time spent on one sampling tick, storage write and detection included",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            samples_recorded: register_int_counter!(
                "rate_watchdog_samples_recorded_total",
                "Samples read from counter sources"
            )
            .expect("Failed to register samples_recorded"),

            source_errors: register_int_counter!(
                "rate_watchdog_source_errors_total",
                "Ticks skipped because the counter source was unavailable"
            )
            .expect("Failed to register source_errors"),

            storage_errors: register_int_counter!(
                "rate_watchdog_storage_errors_total",
                "Storage operations abandoned after retries"
            )
            .expect("Failed to register storage_errors"),

            storage_retries: register_int_counter!(
                "rate_watchdog_storage_retries_total",
                "Storage attempts repeated after a transient failure"
            )
            .expect("Failed to register storage_retries"),

            threshold_violations: register_int_counter!(
                "rate_watchdog_threshold_violations_total",
                "Threshold alarms raised"
            )
            .expect("Failed to register threshold_violations"),

            anomalies_detected: register_int_counter_vec!(
                "rate_watchdog_anomalies_detected_total",
                "Anomaly events emitted by the detection manager",
                &["severity"]
            )
            .expect("Failed to register anomalies_detected"),

            configuration_errors: register_int_counter!(
                "rate_watchdog_configuration_errors_total",
                "Configuration entries rejected at startup"
            )
            .expect("Failed to register configuration_errors"),

            keys_monitored: register_int_gauge!(
                "rate_watchdog_keys_monitored",
                "Keys with a running sampling task"
            )
            .expect("Failed to register keys_monitored"),

            keys_in_alarm: register_int_gauge!(
                "rate_watchdog_keys_in_alarm",
                "Keys whose threshold alarm is currently raised"
            )
            .expect("Failed to register keys_in_alarm"),

            retention_sweeps: register_int_counter!(
                "rate_watchdog_retention_sweeps_total",
                "Completed retention sweeps"
            )
            .expect("Failed to register retention_sweeps"),

            points_aggregated: register_int_counter!(
                "rate_watchdog_points_aggregated_total",
                "Raw samples folded into aggregate buckets"
            )
            .expect("Failed to register points_aggregated"),

            points_removed: register_int_counter!(
                "rate_watchdog_points_removed_total",
                "Raw samples and buckets dropped by retention"
            )
            .expect("Failed to register points_removed"),

            blocks_compressed: register_int_counter!(
                "rate_watchdog_blocks_compressed_total",
                "Blocks stored in compressed form"
            )
            .expect("Failed to register blocks_compressed"),

            compression_bytes_saved: register_int_counter!(
                "rate_watchdog_compression_bytes_saved_total",
                "Bytes saved by block compression"
            )
            .expect("Failed to register compression_bytes_saved"),
        }
    }
}

/// Watchdog metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct WatchdogMetrics {
    _private: (),
}

impl Default for WatchdogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WatchdogMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchdogMetrics")
    }
}

impl WatchdogMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchdogMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn inc_samples_recorded(&self) {
        self.inner().samples_recorded.inc();
    }

    pub fn inc_source_errors(&self) {
        self.inner().source_errors.inc();
    }

    pub fn inc_storage_errors(&self) {
        self.inner().storage_errors.inc();
    }

    pub fn inc_storage_retries(&self) {
        self.inner().storage_retries.inc();
    }

    pub fn inc_threshold_violations(&self) {
        self.inner().threshold_violations.inc();
    }

    pub fn inc_anomalies_detected(&self, severity: &str) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[severity])
            .inc();
    }

    pub fn inc_configuration_errors(&self) {
        self.inner().configuration_errors.inc();
    }

    pub fn set_keys_monitored(&self, count: i64) {
        self.inner().keys_monitored.set(count);
    }

    pub fn set_keys_in_alarm(&self, count: i64) {
        self.inner().keys_in_alarm.set(count);
    }

    pub fn inc_retention_sweeps(&self) {
        self.inner().retention_sweeps.inc();
    }

    pub fn add_retention_points(&self, aggregated: u64, removed: u64) {
        self.inner().points_aggregated.inc_by(aggregated);
        self.inner().points_removed.inc_by(removed);
    }

    pub fn record_compressed_block(&self, bytes_saved: u64) {
        self.inner().blocks_compressed.inc();
        self.inner().compression_bytes_saved.inc_by(bytes_saved);
    }
}

/// Structured logger for watchdog events
///
/// Every event carries an `event` field so log pipelines can route
/// traffic alarms separately from monitor health.
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_threshold_violation(&self, key: &str, value: f64, max_value: f64, consecutive: u32) {
        warn!(
            event = "threshold_violation",
            instance = %self.instance,
            key = %key,
            value = value,
            max_value = max_value,
            consecutive = consecutive,
            "Rate exceeded"
        );
    }

    pub fn log_threshold_cleared(&self, key: &str, period: &AlarmPeriod) {
        info!(
            event = "threshold_cleared",
            instance = %self.instance,
            key = %key,
            alarm_start = period.start,
            alarm_end = period.end,
            duration_secs = period.duration_secs(),
            "Rate back under threshold"
        );
    }

    pub fn log_anomaly(&self, event: &AnomalyEvent) {
        let types: Vec<String> = event.triggered_types.iter().map(ToString::to_string).collect();
        let types = types.join(",");
        match event.severity {
            crate::models::Severity::High | crate::models::Severity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    key = %event.key,
                    value = event.value,
                    confidence = event.confidence_score,
                    severity = %event.severity,
                    triggered_types = %types,
                    "Anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    key = %event.key,
                    value = event.value,
                    confidence = event.confidence_score,
                    severity = %event.severity,
                    triggered_types = %types,
                    "Anomaly detected"
                );
            }
        }
    }

    pub fn log_storage_failure(&self, key: &str, operation: &str, error: &str) {
        error!(
            event = "storage_failure",
            instance = %self.instance,
            key = %key,
            operation = %operation,
            error = %error,
            "Storage operation abandoned"
        );
    }

    pub fn log_storage_recovered(&self, key: &str) {
        info!(
            event = "storage_recovered",
            instance = %self.instance,
            key = %key,
            "Storage writes succeeding again"
        );
    }

    pub fn log_retention_sweep(&self, keys: usize, aggregated: usize, removed: usize, failures: usize) {
        info!(
            event = "retention_sweep",
            instance = %self.instance,
            keys = keys,
            points_aggregated = aggregated,
            points_removed = removed,
            failures = failures,
            "Retention sweep complete"
        );
    }

    /// Log an alert record as delivered to the alerting collaborator
    pub fn log_alert(&self, record: &AlertRecord) {
        info!(
            event = "alert",
            instance = %self.instance,
            kind = %record.kind,
            severity = %record.severity,
            key = %record.key,
            timestamp = record.timestamp,
            details = %record.details,
            "{}",
            record.message
        );
    }

    pub fn log_startup(&self, version: &str, keys: usize, enhanced: bool) {
        info!(
            event = "watchdog_started",
            instance = %self.instance,
            version = %version,
            keys = keys,
            enhanced_detection = enhanced,
            "Rate watchdog started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watchdog_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Rate watchdog shutting down"
        );
    }
}
