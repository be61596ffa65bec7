//! Global scan loop
//!
//! Re-reads every key's published state on its own cadence, independent of
//! each key's sampling interval. It refreshes the in-alarm gauge and derives
//! two component states from the keys:
//! - scheduler: degraded when some keys stop ticking, unhealthy when all do
//! - detection: degraded while enhanced keys lack the history to score

use super::status::StatusBoard;
use crate::health::{Component, ComponentStatus, HealthRegistry};
use crate::observability::WatchdogMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Intervals a key may miss before it counts as stale
const STALE_AFTER_INTERVALS: i64 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub keys: usize,
    pub in_alarm: Vec<String>,
    pub stale: Vec<String>,
    /// Enhanced keys whose window is still too short for the
    /// history-based detectors
    pub warming: Vec<String>,
}

pub struct ScanLoop {
    board: Arc<StatusBoard>,
    interval: Duration,
    health: HealthRegistry,
    metrics: WatchdogMetrics,
}

impl ScanLoop {
    pub fn new(
        board: Arc<StatusBoard>,
        interval: Duration,
        health: HealthRegistry,
        metrics: WatchdogMetrics,
    ) -> Self {
        Self {
            board,
            interval,
            health,
            metrics,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting scan loop");
        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.scan_at(chrono::Utc::now().timestamp()).await;
                    debug!(
                        keys = report.keys,
                        in_alarm = report.in_alarm.len(),
                        stale = report.stale.len(),
                        warming = report.warming.len(),
                        "Scan complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scan loop");
                    break;
                }
            }
        }
    }

    pub async fn scan_at(&self, now: i64) -> ScanReport {
        let mut report = ScanReport::default();
        for view in self.board.snapshot() {
            report.keys += 1;
            if view.in_alarm {
                report.in_alarm.push(view.key.clone());
            }
            if view.detection_warm == Some(false) {
                report.warming.push(view.key.clone());
            }
            if view.is_stale(now, STALE_AFTER_INTERVALS) {
                report.stale.push(view.key);
            }
        }

        self.metrics.set_keys_in_alarm(report.in_alarm.len() as i64);

        let scheduler = if report.stale.is_empty() {
            ComponentStatus::Healthy
        } else if report.stale.len() == report.keys {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        let message = (!report.stale.is_empty())
            .then(|| format!("stale keys: {}", report.stale.join(", ")));
        if self
            .health
            .report(Component::Scheduler, scheduler, message)
            .await
            && scheduler != ComponentStatus::Healthy
        {
            warn!(stale = ?report.stale, "Sampling tasks have stopped ticking");
        }

        let detection = if report.warming.is_empty() {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::Degraded
        };
        let message = (!report.warming.is_empty())
            .then(|| format!("insufficient history: {}", report.warming.join(", ")));
        self.health
            .report(Component::Detection, detection, message)
            .await;

        report
    }
}
