//! Per-key sampling task
//!
//! One tick:
//! 1. read the live counter (bounded by a timeout)
//! 2. fetch the detection window from memory
//! 3. update the consecutive-violation tracker
//! 4. run the detection manager, when enhanced detection is on
//! 5. append the new sample, giving the store at most one interval
//! 6. publish the key's view
//!
//! A failed source read skips the tick without touching the violation
//! counter. Alerts never wait on the store; a write that fails or runs out
//! of time stays queued for the next tick.

use super::source::CounterSource;
use super::status::StatusBoard;
use super::threshold::{ThresholdTracker, ThresholdTransition};
use crate::alerting::{AlertRecord, AlertSink};
use crate::anomaly::DetectionManager;
use crate::health::{Component, HealthRegistry};
use crate::models::{AnomalyEvent, Sample, ThresholdConfig};
use crate::observability::{StructuredLogger, WatchdogMetrics};
use crate::storage::{StorageEngine, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Collaborators shared by every sampling task
#[derive(Clone)]
pub struct TaskContext {
    pub source: Arc<dyn CounterSource>,
    pub engine: Arc<StorageEngine>,
    pub sink: Arc<dyn AlertSink>,
    pub board: Arc<StatusBoard>,
    pub health: HealthRegistry,
    pub metrics: WatchdogMetrics,
    pub logger: StructuredLogger,
    /// Samples handed to detectors
    pub window_size: usize,
    pub source_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SourceUnavailable,
    /// The tick's aligned timestamp was already sampled
    AlreadySampled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Recorded {
        sample: Sample,
        stored: bool,
        transition: Option<ThresholdTransition>,
        anomaly: Option<AnomalyEvent>,
    },
}

pub struct SamplingTask {
    config: ThresholdConfig,
    ctx: TaskContext,
    tracker: ThresholdTracker,
    manager: Option<DetectionManager>,
    last_timestamp: Option<i64>,
    storage_failing: bool,
}

impl SamplingTask {
    pub fn new(
        config: ThresholdConfig,
        ctx: TaskContext,
        manager: Option<DetectionManager>,
        last_timestamp: Option<i64>,
    ) -> Self {
        Self {
            tracker: ThresholdTracker::new(&config),
            config,
            ctx,
            manager,
            last_timestamp,
            storage_failing: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.config.monitored_key
    }

    fn interval_secs(&self) -> i64 {
        self.config.sample_interval_seconds.max(1) as i64
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            key = %self.config.monitored_key,
            interval_secs = self.config.sample_interval_seconds,
            max_value = self.config.max_value,
            consecutive_duration = self.config.consecutive_duration,
            enhanced = self.manager.is_some(),
            "Starting sampling task"
        );

        let mut ticker = interval(Duration::from_secs(self.interval_secs() as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    self.tick_at(now).await;
                }
                _ = shutdown.recv() => {
                    debug!(key = %self.config.monitored_key, "Stopping sampling task");
                    break;
                }
            }
        }
    }

    /// Run one tick as if the clock read `now` (epoch seconds)
    pub async fn tick_at(&mut self, now: i64) -> TickOutcome {
        let started = Instant::now();
        let key = self.config.monitored_key.clone();
        let timestamp = now - now.rem_euclid(self.interval_secs());

        if self.last_timestamp.is_some_and(|last| timestamp <= last) {
            return TickOutcome::Skipped(SkipReason::AlreadySampled);
        }

        let value = match tokio::time::timeout(self.ctx.source_timeout, self.ctx.source.read(&key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.ctx.metrics.inc_source_errors();
                warn!(key = %key, error = %e, "Counter source unavailable, skipping tick");
                return TickOutcome::Skipped(SkipReason::SourceUnavailable);
            }
            Err(_) => {
                self.ctx.metrics.inc_source_errors();
                warn!(
                    key = %key,
                    timeout_ms = self.ctx.source_timeout.as_millis() as u64,
                    "Counter source timed out, skipping tick"
                );
                return TickOutcome::Skipped(SkipReason::SourceUnavailable);
            }
        };

        let sample = Sample::new(timestamp, value);
        let window = self.ctx.engine.recent(&key, self.ctx.window_size).await;
        if window.last().is_some_and(|last| last.timestamp >= timestamp) {
            self.last_timestamp = Some(timestamp);
            return TickOutcome::Skipped(SkipReason::AlreadySampled);
        }
        self.last_timestamp = Some(timestamp);
        self.ctx.metrics.inc_samples_recorded();

        let transition = self.tracker.observe(&sample);
        match transition {
            Some(ThresholdTransition::Raised { consecutive }) => {
                self.ctx.metrics.inc_threshold_violations();
                self.ctx
                    .logger
                    .log_threshold_violation(&key, value, self.config.max_value, consecutive);
                self.ctx
                    .sink
                    .emit(AlertRecord::threshold_violation(
                        &key,
                        timestamp,
                        value,
                        self.config.max_value,
                        consecutive,
                    ))
                    .await;
            }
            Some(ThresholdTransition::Cleared(period)) => {
                self.ctx.logger.log_threshold_cleared(&key, &period);
                self.ctx.sink.emit(AlertRecord::threshold_cleared(&key, &period)).await;
            }
            None => {}
        }

        let anomaly = match self.manager.as_mut() {
            Some(manager) => manager.evaluate(&sample, &window),
            None => None,
        };
        if let Some(event) = &anomaly {
            self.ctx
                .metrics
                .inc_anomalies_detected(&event.severity.to_string());
            self.ctx.logger.log_anomaly(event);
            self.ctx.sink.emit(AlertRecord::anomaly(event)).await;
        }

        let budget = Duration::from_secs(self.interval_secs() as u64);
        let stored = match self.ctx.engine.append_within(&key, sample, budget).await {
            Ok(()) => {
                self.storage_recovered(&key, timestamp).await;
                true
            }
            Err(e @ StorageError::OutOfOrder { .. }) => {
                warn!(key = %key, error = %e, "Dropping out-of-order sample");
                false
            }
            Err(e) => {
                self.storage_failed(&key, timestamp, &e).await;
                false
            }
        };

        let detection_warm = self.manager.as_ref().map(|m| m.is_warm(window.len()));
        let report = anomaly
            .as_ref()
            .and_then(|_| self.manager.as_ref())
            .map(|m| m.history().report());
        let tracker = &self.tracker;
        let storage_failing = self.storage_failing;
        self.ctx.board.update(&key, |view| {
            view.consecutive = tracker.consecutive();
            view.in_alarm = tracker.in_alarm();
            view.alarm_start = tracker.alarm_start();
            view.last_tick = Some(timestamp);
            view.last_value = Some(value);
            view.storage_failing = storage_failing;
            view.detection_warm = detection_warm;
            if let Some(ThresholdTransition::Cleared(period)) = transition {
                view.push_alarm(period);
            }
            if let Some(report) = report {
                view.anomalies = report;
            }
        });

        self.ctx
            .metrics
            .observe_tick_latency(started.elapsed().as_secs_f64());

        TickOutcome::Recorded {
            sample,
            stored,
            transition,
            anomaly,
        }
    }

    async fn storage_failed(&mut self, key: &str, timestamp: i64, error: &StorageError) {
        if self.storage_failing {
            debug!(key = %key, error = %error, "Storage still failing");
            return;
        }
        self.storage_failing = true;
        let error = error.to_string();
        self.ctx.logger.log_storage_failure(key, "append", &error);
        self.ctx
            .health
            .set_degraded(Component::Storage, format!("writes failing for {key}: {error}"))
            .await;
        self.ctx
            .sink
            .emit(AlertRecord::storage_failure(key, timestamp, "append", &error))
            .await;
    }

    async fn storage_recovered(&mut self, key: &str, timestamp: i64) {
        if !self.storage_failing {
            return;
        }
        self.storage_failing = false;
        self.ctx.logger.log_storage_recovered(key);
        self.ctx.health.set_healthy(Component::Storage).await;
        self.ctx
            .sink
            .emit(AlertRecord::storage_recovered(key, timestamp))
            .await;
    }
}
