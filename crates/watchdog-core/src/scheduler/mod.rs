//! Sampling scheduler
//!
//! Runs one recurring task per configured key plus a global scan loop and a
//! retention sweep loop. Tasks share the storage engine and alert sink but
//! own their violation counters and detection state.

mod scan;
mod source;
mod status;
mod strategy;
mod sweep;
mod task;
mod threshold;


pub use scan::{ScanLoop, ScanReport};
pub use source::{CounterSource, RedisCounterSource, SharedCounters, SourceError};
pub use status::{KeyView, StatusBoard, WatchdogQuery, ALARM_HISTORY_CAPACITY};
pub use strategy::DetectionStrategy;
pub use sweep::RetentionLoop;
pub use task::{SamplingTask, SkipReason, TaskContext, TickOutcome};
pub use threshold::{ThresholdTracker, ThresholdTransition};

use crate::alerting::{AlertRecord, AlertSink};
use crate::config::{ConfigError, WatchdogConfig};
use crate::health::HealthRegistry;
use crate::observability::{StructuredLogger, WatchdogMetrics};
use crate::storage::StorageEngine;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Builder wiring the scheduler to its collaborators
pub struct SchedulerBuilder {
    config: WatchdogConfig,
    source: Option<Arc<dyn CounterSource>>,
    engine: Option<Arc<StorageEngine>>,
    sink: Option<Arc<dyn AlertSink>>,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl SchedulerBuilder {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            source: None,
            engine: None,
            sink: None,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("rate-watchdog"),
        }
    }

    /// Set the counter source
    pub fn source(mut self, source: Arc<dyn CounterSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the storage engine
    pub fn engine(mut self, engine: Arc<StorageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the alert sink
    pub fn sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Validate configuration, register every key with the engine and build the tasks
    ///
    /// Invalid per-key entries are reported to the alert sink and skipped;
    /// invalid global options and an empty key set are fatal.
    pub async fn build(self) -> Result<Scheduler> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Counter source is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Storage engine is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Alert sink is required"))?;

        self.config.validate()?;
        let metrics = WatchdogMetrics::new();
        let now = chrono::Utc::now().timestamp();

        let (thresholds, rejected) = self.config.threshold_configs();
        for error in &rejected {
            metrics.inc_configuration_errors();
            let entry = match error {
                ConfigError::InvalidThreshold { entry, .. } => entry.as_str(),
                _ => "rate_monitoring.thresholds",
            };
            warn!(entry = %entry, error = %error, "Not scheduling rejected threshold entry");
            sink.emit(AlertRecord::configuration(entry, now, &error.to_string()))
                .await;
        }
        if thresholds.is_empty() {
            return Err(ConfigError::NoThresholds.into());
        }

        let monitoring = &self.config.rate_monitoring;
        let strategy =
            DetectionStrategy::from_config(monitoring.use_enhanced_detection, &self.config.detection);
        let board = Arc::new(StatusBoard::new());
        let ctx = TaskContext {
            source,
            engine: engine.clone(),
            sink: sink.clone(),
            board: board.clone(),
            health: self.health.clone(),
            metrics: metrics.clone(),
            logger: self.logger.clone(),
            window_size: monitoring.window_size,
            source_timeout: monitoring.source_timeout(),
        };

        let mut tasks = Vec::with_capacity(thresholds.len());
        for threshold in thresholds {
            let key = threshold.monitoring_key();
            let loaded = engine.register(key).await;
            let last_timestamp = engine
                .recent(&threshold.monitored_key, 1)
                .await
                .last()
                .map(|s| s.timestamp);
            info!(
                key = %threshold.monitored_key,
                loaded,
                "Registered monitoring key"
            );

            let manager = strategy.manager_for(&threshold.monitored_key, threshold.max_value);
            let mut view = KeyView::new(
                &threshold.monitored_key,
                threshold.sample_interval_seconds,
                threshold.max_value,
                now,
            );
            view.detection_warm = manager
                .as_ref()
                .map(|m| m.is_warm(loaded.min(monitoring.window_size)));
            board.register(view);
            tasks.push(SamplingTask::new(threshold, ctx.clone(), manager, last_timestamp));
        }
        metrics.set_keys_monitored(tasks.len() as i64);

        let scan = ScanLoop::new(
            board.clone(),
            monitoring.scan_interval(),
            self.health.clone(),
            metrics.clone(),
        );
        let retention = RetentionLoop::new(
            engine.clone(),
            self.config.storage.sweep_interval(),
            sink,
            self.health.clone(),
            self.logger.clone(),
        );

        Ok(Scheduler {
            tasks,
            scan,
            retention,
            board,
            engine,
            strategy,
            health: self.health,
            grace: monitoring.shutdown_grace(),
        })
    }
}

/// A built, not yet started scheduler
pub struct Scheduler {
    tasks: Vec<SamplingTask>,
    scan: ScanLoop,
    retention: RetentionLoop,
    board: Arc<StatusBoard>,
    engine: Arc<StorageEngine>,
    strategy: DetectionStrategy,
    health: HealthRegistry,
    grace: Duration,
}

impl Scheduler {
    pub fn keys(&self) -> Vec<String> {
        self.board.keys()
    }

    pub fn is_enhanced(&self) -> bool {
        self.strategy.is_enhanced()
    }

    pub fn query(&self) -> WatchdogQuery {
        WatchdogQuery::new(self.engine.clone(), self.board.clone())
    }

    /// Spawn every task; each stops on the next signal from `shutdown`
    pub async fn start(self, shutdown: &broadcast::Sender<()>) -> SchedulerHandle {
        let mut join_set = JoinSet::new();
        let keys = self.tasks.len();

        for task in self.tasks {
            join_set.spawn(task.run(shutdown.subscribe()));
        }
        join_set.spawn(self.scan.run(shutdown.subscribe()));
        join_set.spawn(self.retention.run(shutdown.subscribe()));

        self.health.register_all().await;
        self.health.set_ready(true).await;
        info!(keys, enhanced = self.strategy.is_enhanced(), "Scheduler started");

        SchedulerHandle {
            join_set,
            shutdown: shutdown.clone(),
            grace: self.grace,
            query: WatchdogQuery::new(self.engine, self.board),
            health: self.health,
        }
    }
}

/// Running scheduler
pub struct SchedulerHandle {
    join_set: JoinSet<()>,
    shutdown: broadcast::Sender<()>,
    grace: Duration,
    query: WatchdogQuery,
    health: HealthRegistry,
}

impl SchedulerHandle {
    pub fn query(&self) -> WatchdogQuery {
        self.query.clone()
    }

    /// Signal every task, wait out the grace period, then abort the rest
    ///
    /// Returns the number of tasks abandoned mid-tick.
    pub async fn shutdown(mut self) -> usize {
        self.health.set_ready(false).await;
        let _ = self.shutdown.send(());

        let drained = tokio::time::timeout(self.grace, async {
            while self.join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            info!("All scheduler tasks stopped");
            return 0;
        }

        let abandoned = self.join_set.len();
        warn!(
            abandoned,
            grace_ms = self.grace.as_millis() as u64,
            "Aborting scheduler tasks still running after grace period"
        );
        self.join_set.abort_all();
        while self.join_set.join_next().await.is_some() {}
        abandoned
    }
}
