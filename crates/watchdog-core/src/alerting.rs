//! Alert records handed to the alert-delivery collaborator
//!
//! Traffic alerts (threshold violations, anomalies) and monitor-health alerts
//! (storage failures, rejected configuration) share one record type but carry
//! distinct kinds so operators can tell a broken monitor from a misbehaving
//! network.

use crate::models::{AlarmPeriod, AnomalyEvent, Severity};
use crate::observability::StructuredLogger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ThresholdViolation,
    ThresholdCleared,
    Anomaly,
    StorageHealth,
    Configuration,
}

impl AlertKind {
    /// Whether the alert concerns the monitor itself rather than the traffic
    pub fn is_system_health(&self) -> bool {
        matches!(self, AlertKind::StorageHealth | AlertKind::Configuration)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertKind::ThresholdViolation => "threshold_violation",
            AlertKind::ThresholdCleared => "threshold_cleared",
            AlertKind::Anomaly => "anomaly",
            AlertKind::StorageHealth => "storage_health",
            AlertKind::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub kind: AlertKind,
    pub severity: Severity,
    pub key: String,
    pub message: String,
    pub timestamp: i64,
    pub details: serde_json::Value,
}

impl AlertRecord {
    pub fn threshold_violation(
        key: &str,
        timestamp: i64,
        value: f64,
        max_value: f64,
        consecutive: u32,
    ) -> Self {
        Self {
            kind: AlertKind::ThresholdViolation,
            severity: Severity::High,
            key: key.to_string(),
            message: format!(
                "{key} above {max_value} for {consecutive} consecutive samples (last {value})"
            ),
            timestamp,
            details: json!({
                "value": value,
                "max_value": max_value,
                "consecutive": consecutive,
            }),
        }
    }

    pub fn threshold_cleared(key: &str, period: &AlarmPeriod) -> Self {
        Self {
            kind: AlertKind::ThresholdCleared,
            severity: Severity::Low,
            key: key.to_string(),
            message: format!("{key} back under threshold after {}s", period.duration_secs()),
            timestamp: period.end,
            details: json!({
                "start": period.start,
                "end": period.end,
                "duration_secs": period.duration_secs(),
            }),
        }
    }

    pub fn anomaly(event: &AnomalyEvent) -> Self {
        let types: Vec<String> = event.triggered_types.iter().map(ToString::to_string).collect();
        Self {
            kind: AlertKind::Anomaly,
            severity: event.severity,
            key: event.key.clone(),
            message: format!(
                "{} anomaly on {} ({}), confidence {:.2}",
                event.severity,
                event.key,
                types.join(", "),
                event.confidence_score
            ),
            timestamp: event.timestamp,
            details: json!({
                "value": event.value,
                "triggered_types": types,
                "confidence_score": event.confidence_score,
            }),
        }
    }

    pub fn storage_failure(key: &str, timestamp: i64, operation: &str, error: &str) -> Self {
        Self {
            kind: AlertKind::StorageHealth,
            severity: Severity::High,
            key: key.to_string(),
            message: format!("storage {operation} failing for {key}: {error}"),
            timestamp,
            details: json!({
                "operation": operation,
                "error": error,
                "recovered": false,
            }),
        }
    }

    pub fn storage_recovered(key: &str, timestamp: i64) -> Self {
        Self {
            kind: AlertKind::StorageHealth,
            severity: Severity::Low,
            key: key.to_string(),
            message: format!("storage writes for {key} recovered"),
            timestamp,
            details: json!({ "recovered": true }),
        }
    }

    pub fn configuration(entry: &str, timestamp: i64, error: &str) -> Self {
        Self {
            kind: AlertKind::Configuration,
            severity: Severity::Critical,
            key: entry.to_string(),
            message: format!("configuration rejected: {error}"),
            timestamp,
            details: json!({ "entry": entry, "error": error }),
        }
    }
}

/// Destination for alert records
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, record: AlertRecord);
}

/// Forwards records over a bounded channel
///
/// A full or closed channel drops the record with a warning rather than
/// stalling the sampling task.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::Sender<AlertRecord>,
}

impl ChannelAlertSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AlertRecord>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn emit(&self, record: AlertRecord) {
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "Dropping alert record");
        }
    }
}

/// Writes records to the structured log
#[derive(Debug, Clone)]
pub struct LogAlertSink {
    logger: StructuredLogger,
}

impl LogAlertSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn emit(&self, record: AlertRecord) {
        self.logger.log_alert(&record);
    }
}
