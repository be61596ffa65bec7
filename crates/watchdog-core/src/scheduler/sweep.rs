//! Background retention sweep

use crate::alerting::{AlertRecord, AlertSink};
use crate::health::{Component, HealthRegistry};
use crate::observability::{StructuredLogger, WatchdogMetrics};
use crate::storage::{StorageEngine, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

pub struct RetentionLoop {
    engine: Arc<StorageEngine>,
    interval: Duration,
    sink: Arc<dyn AlertSink>,
    health: HealthRegistry,
    metrics: WatchdogMetrics,
    logger: StructuredLogger,
}

impl RetentionLoop {
    pub fn new(
        engine: Arc<StorageEngine>,
        interval: Duration,
        sink: Arc<dyn AlertSink>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            engine,
            interval,
            sink,
            health,
            metrics: WatchdogMetrics::new(),
            logger,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            policies = self.engine.policies().policies().len(),
            "Starting retention sweep loop"
        );
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_at(chrono::Utc::now().timestamp()).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down retention sweep loop");
                    break;
                }
            }
        }
    }

    pub async fn sweep_at(&self, now: i64) -> SweepReport {
        let report = self.engine.sweep_all(now).await;
        self.metrics.inc_retention_sweeps();
        self.logger.log_retention_sweep(
            report.keys_swept,
            report.points_aggregated,
            report.points_removed,
            report.failures.len(),
        );

        if report.failures.is_empty() {
            self.health.set_healthy(Component::Retention).await;
        } else {
            self.health
                .set_degraded(
                    Component::Retention,
                    format!("sweep failed for {} keys", report.failures.len()),
                )
                .await;
            for (key, error) in &report.failures {
                self.sink
                    .emit(AlertRecord::storage_failure(key, now, "retention", &error.to_string()))
                    .await;
            }
        }
        report
    }
}
