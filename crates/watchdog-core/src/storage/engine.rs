//! Storage engine
//!
//! Per key the engine keeps:
//! - a live window in memory, ring-bounded by the key's raw capacity
//! - a queue of samples whose write has not reached the backing store yet
//! - a raw list in the store (one entry per sample, trimmed to capacity)
//! - an aggregate list in the store, rewritten by retention sweeps
//!
//! A key's lock is held only for one append or one sweep read-modify-write.

use super::retention::{apply_policy, AggregateBucket, PolicySet, SweepPlan};
use super::{BlockCodec, RetryPolicy, StorageError, TimeSeriesBackend};
use crate::config::{ConfigError, StorageConfig};
use crate::models::{MonitoringKey, Sample};
use crate::observability::WatchdogMetrics;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Snapshot of storage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub points_processed: u64,
    pub points_aggregated: u64,
    pub points_removed: u64,
    pub blocks_compressed: u64,
    pub bytes_saved: u64,
    pub write_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    points_processed: AtomicU64,
    points_aggregated: AtomicU64,
    points_removed: AtomicU64,
    blocks_compressed: AtomicU64,
    bytes_saved: AtomicU64,
    write_failures: AtomicU64,
}

/// Outcome of a sweep over every registered key
#[derive(Debug, Default)]
pub struct SweepReport {
    pub keys_swept: usize,
    pub keys_changed: usize,
    pub points_aggregated: usize,
    pub points_removed: usize,
    pub failures: Vec<(String, StorageError)>,
}

#[derive(Debug)]
struct Series {
    key: MonitoringKey,
    live: VecDeque<Sample>,
    pending: VecDeque<Sample>,
}

impl Series {
    fn new(key: MonitoringKey, mut loaded: Vec<Sample>) -> Self {
        let excess = loaded.len().saturating_sub(key.max_samples);
        loaded.drain(..excess);
        Self {
            live: loaded.into(),
            pending: VecDeque::new(),
            key,
        }
    }

    fn last_timestamp(&self) -> Option<i64> {
        self.live.back().map(|s| s.timestamp)
    }

    fn push(&mut self, sample: Sample) {
        let capacity = self.key.max_samples;
        while self.live.len() >= capacity {
            self.live.pop_front();
        }
        while self.pending.len() >= capacity {
            self.pending.pop_front();
        }
        self.live.push_back(sample);
        self.pending.push_back(sample);
    }
}

/// Persists and retrieves per-key time series
pub struct StorageEngine {
    backend: Arc<dyn TimeSeriesBackend>,
    codec: BlockCodec,
    retry: RetryPolicy,
    policies: PolicySet,
    aggregate_block_size: usize,
    series: DashMap<String, Arc<Mutex<Series>>>,
    stats: StatsCounters,
    metrics: WatchdogMetrics,
}

impl StorageEngine {
    pub fn new(
        backend: Arc<dyn TimeSeriesBackend>,
        codec: BlockCodec,
        retry: RetryPolicy,
        policies: PolicySet,
    ) -> Self {
        Self {
            backend,
            codec,
            retry,
            policies,
            aggregate_block_size: 128,
            series: DashMap::new(),
            stats: StatsCounters::default(),
            metrics: WatchdogMetrics::new(),
        }
    }

    pub fn from_config(
        backend: Arc<dyn TimeSeriesBackend>,
        config: &StorageConfig,
    ) -> Result<Self, ConfigError> {
        let policies = PolicySet::new(config.retention_policies()?);
        Ok(Self::new(
            backend,
            BlockCodec::new(config.compression()),
            config.retry_policy(),
            policies,
        )
        .with_aggregate_block_size(config.aggregate_block_size))
    }

    pub fn with_aggregate_block_size(mut self, size: usize) -> Self {
        self.aggregate_block_size = size.max(1);
        self
    }

    pub fn raw_list(key: &str) -> String {
        key.to_string()
    }

    pub fn aggregate_list(key: &str) -> String {
        format!("{key}:aggregated")
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Register a key and load the raw samples already in the store
    ///
    /// Returns the number of samples loaded into the live window. A store
    /// that cannot be read leaves the window empty.
    pub async fn register(&self, key: MonitoringKey) -> usize {
        let list = Self::raw_list(&key.id);
        let backend = self.backend.as_ref();
        let loaded = match self
            .retry
            .run("load", || backend.read_all(&list))
            .await
        {
            Ok(entries) => self.decode_raw(&key.id, &entries).0,
            Err(e) => {
                warn!(key = %key.id, error = %e, "Could not load stored series, starting empty");
                Vec::new()
            }
        };

        let series = Series::new(key.clone(), loaded);
        let count = series.live.len();
        debug!(key = %key.id, loaded = count, capacity = key.max_samples, "Registered series");
        self.series.insert(key.id, Arc::new(Mutex::new(series)));
        count
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.series.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.series.contains_key(key)
    }

    fn series(&self, key: &str) -> Option<Arc<Mutex<Series>>> {
        self.series.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn series_or_default(&self, key: &str) -> Arc<Mutex<Series>> {
        self.series
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Series::new(MonitoringKey::new(key), Vec::new()))))
            .value()
            .clone()
    }

    /// Append a sample to the key's live window and persist it
    ///
    /// The live window is updated even when the write fails; the unwritten
    /// samples are retried ahead of the next append.
    pub async fn append(&self, key: &str, sample: Sample) -> Result<(), StorageError> {
        self.append_bounded(key, sample, None).await
    }

    /// Like [`append`](Self::append), but gives up on the write after
    /// `budget` however many retries remain
    ///
    /// The sample stays queued for the next write when the budget runs out.
    pub async fn append_within(
        &self,
        key: &str,
        sample: Sample,
        budget: Duration,
    ) -> Result<(), StorageError> {
        self.append_bounded(key, sample, Some(budget)).await
    }

    async fn append_bounded(
        &self,
        key: &str,
        sample: Sample,
        budget: Option<Duration>,
    ) -> Result<(), StorageError> {
        let series = self.series_or_default(key);
        let mut series = series.lock().await;

        if let Some(last) = series.last_timestamp() {
            if sample.timestamp <= last {
                return Err(StorageError::OutOfOrder {
                    key: key.to_string(),
                    timestamp: sample.timestamp,
                    last,
                });
            }
        }

        series.push(sample);
        self.stats.points_processed.fetch_add(1, Ordering::Relaxed);

        let Some(budget) = budget else {
            return self.flush_pending(&mut series).await;
        };
        match tokio::time::timeout(budget, self.flush_pending(&mut series)).await {
            Ok(result) => result,
            Err(_) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_storage_errors();
                warn!(
                    key = %key,
                    queued = series.pending.len(),
                    budget_ms = budget.as_millis() as u64,
                    "Append ran out of time, samples kept for the next write"
                );
                Err(StorageError::Timeout {
                    operation: "append",
                    timeout_ms: budget.as_millis() as u64,
                })
            }
        }
    }

    async fn flush_pending(&self, series: &mut Series) -> Result<(), StorageError> {
        let entries = series
            .pending
            .iter()
            .map(|s| self.codec.encode_sample(s).map(|block| block.to_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        let list = Self::raw_list(&series.key.id);
        let capacity = series.key.max_samples;
        let backend = self.backend.as_ref();

        let result = self
            .retry
            .run("append", || backend.push_bounded(&list, entries.clone(), capacity))
            .await;

        match result {
            Ok(()) => {
                if series.pending.len() > 1 {
                    info!(key = %series.key.id, flushed = series.pending.len(), "Flushed queued samples");
                }
                series.pending.clear();
                Ok(())
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_storage_errors();
                warn!(
                    key = %series.key.id,
                    queued = series.pending.len(),
                    error = %e,
                    "Append abandoned, samples kept for the next write"
                );
                Err(e)
            }
        }
    }

    /// The newest `n` samples of the live window, oldest first
    pub async fn recent(&self, key: &str, n: usize) -> Vec<Sample> {
        let Some(series) = self.series(key) else {
            return Vec::new();
        };
        let series = series.lock().await;
        let skip = series.live.len().saturating_sub(n);
        series.live.iter().skip(skip).copied().collect()
    }

    /// Samples overlapping `[start, end]` in timestamp order
    ///
    /// Aggregate buckets appear as one sample at their start. When the store
    /// cannot be read the live window is served instead.
    pub async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<Sample>, StorageError> {
        let in_range = |s: &Sample| s.timestamp >= start && s.timestamp <= end;
        let series = self.series(key);

        let (raw, aggregates, _) = match self.read_stored(key).await {
            Ok(stored) => stored,
            Err(e) => {
                let Some(series) = series else {
                    return Err(e);
                };
                warn!(key = %key, error = %e, "Range read failed, serving the in-memory window");
                let series = series.lock().await;
                return Ok(series.live.iter().filter(|s| in_range(*s)).copied().collect());
            }
        };

        let pending: Vec<Sample> = match &series {
            Some(series) => series.lock().await.pending.iter().copied().collect(),
            None => Vec::new(),
        };

        let mut samples: Vec<Sample> = aggregates
            .iter()
            .filter(|b| b.overlaps(start, end))
            .map(AggregateBucket::as_sample)
            .chain(raw.into_iter().chain(pending).filter(|s| in_range(s)))
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples.dedup_by_key(|s| s.timestamp);
        Ok(samples)
    }

    /// Stored raw samples, aggregates and the number of duplicate raw entries
    async fn read_stored(
        &self,
        key: &str,
    ) -> Result<(Vec<Sample>, Vec<AggregateBucket>, usize), StorageError> {
        let raw_list = Self::raw_list(key);
        let aggregate_list = Self::aggregate_list(key);
        let backend = self.backend.as_ref();

        let raw_entries = self
            .retry
            .run("range", || backend.read_all(&raw_list))
            .await?;
        let aggregate_entries = self
            .retry
            .run("range", || backend.read_all(&aggregate_list))
            .await?;

        let (raw, duplicates) = self.decode_raw(key, &raw_entries);
        Ok((raw, self.decode_aggregates(key, &aggregate_entries), duplicates))
    }

    /// Decode raw entries, skipping any that neither encoding nor the legacy
    /// format can read
    ///
    /// Samples sharing a timestamp (a write retried after the store already
    /// took it) collapse to the first; the second value is how many did.
    fn decode_raw(&self, key: &str, entries: &[Vec<u8>]) -> (Vec<Sample>, usize) {
        let mut undecodable = 0usize;
        let mut samples: Vec<Sample> = entries
            .iter()
            .flat_map(|entry| match self.codec.decode_samples(entry) {
                Ok(samples) => samples,
                Err(_) => {
                    undecodable += 1;
                    Vec::new()
                }
            })
            .collect();
        if undecodable > 0 {
            warn!(key = %key, undecodable, "Skipped undecodable stored samples");
        }
        samples.sort_by_key(|s| s.timestamp);
        let decoded = samples.len();
        samples.dedup_by_key(|s| s.timestamp);
        let duplicates = decoded - samples.len();
        (samples, duplicates)
    }

    fn decode_aggregates(&self, key: &str, entries: &[Vec<u8>]) -> Vec<AggregateBucket> {
        let mut buckets = Vec::new();
        for entry in entries {
            match self.codec.decode_aggregates(entry) {
                Ok(decoded) => buckets.extend(decoded),
                Err(e) => warn!(key = %key, error = %e, "Skipped undecodable aggregate block"),
            }
        }
        buckets.sort_by_key(|b| b.start);
        buckets
    }

    /// Apply the most specific retention policy to one key at `now`
    ///
    /// Returns `None` when no policy matches. The store is only rewritten
    /// when the plan changes something or the raw list holds duplicates.
    pub async fn sweep_key(&self, key: &str, now: i64) -> Result<Option<SweepPlan>, StorageError> {
        let Some(policy) = self.policies.select(key) else {
            debug!(key = %key, "No retention policy matches key");
            return Ok(None);
        };

        let series = self.series(key);
        let _guard = match &series {
            Some(series) => Some(series.lock().await),
            None => None,
        };

        let (raw, aggregates, duplicates) = self.read_stored(key).await?;
        let plan = apply_policy(policy, raw, aggregates, now);
        if !plan.changed() && duplicates == 0 {
            return Ok(Some(plan));
        }
        if duplicates > 0 {
            debug!(key = %key, duplicates, "Collapsing duplicate raw samples");
        }

        let raw_entries = plan
            .raw
            .iter()
            .map(|s| self.codec.encode_sample(s).map(|block| block.to_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut aggregate_entries = Vec::new();
        for chunk in plan.aggregates.chunks(self.aggregate_block_size) {
            let block = self.codec.encode_aggregates(chunk)?;
            let saved = block.bytes_saved() as u64;
            if saved > 0 {
                self.stats.blocks_compressed.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_saved.fetch_add(saved, Ordering::Relaxed);
                self.metrics.record_compressed_block(saved);
            }
            aggregate_entries.push(block.to_bytes());
        }

        let raw_list = Self::raw_list(key);
        let aggregate_list = Self::aggregate_list(key);
        let backend = self.backend.as_ref();
        self.retry
            .run("sweep", || {
                backend.replace(vec![
                    (raw_list.clone(), raw_entries.clone()),
                    (aggregate_list.clone(), aggregate_entries.clone()),
                ])
            })
            .await?;

        self.stats
            .points_aggregated
            .fetch_add(plan.aggregated as u64, Ordering::Relaxed);
        self.stats
            .points_removed
            .fetch_add(plan.removed as u64, Ordering::Relaxed);
        self.metrics
            .add_retention_points(plan.aggregated as u64, plan.removed as u64);

        debug!(
            key = %key,
            pattern = %policy.key_pattern(),
            aggregated = plan.aggregated,
            removed = plan.removed,
            raw_remaining = plan.raw.len(),
            buckets = plan.aggregates.len(),
            "Applied retention policy"
        );
        Ok(Some(plan))
    }

    /// Sweep every registered key; one key's failure does not stop the others
    pub async fn sweep_all(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();
        for key in self.keys() {
            match self.sweep_key(&key, now).await {
                Ok(Some(plan)) => {
                    report.keys_swept += 1;
                    if plan.changed() {
                        report.keys_changed += 1;
                    }
                    report.points_aggregated += plan.aggregated;
                    report.points_removed += plan.removed;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Retention sweep failed for key");
                    report.failures.push((key, e));
                }
            }
        }
        report
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            points_processed: self.stats.points_processed.load(Ordering::Relaxed),
            points_aggregated: self.stats.points_aggregated.load(Ordering::Relaxed),
            points_removed: self.stats.points_removed.load(Ordering::Relaxed),
            blocks_compressed: self.stats.blocks_compressed.load(Ordering::Relaxed),
            bytes_saved: self.stats.bytes_saved.load(Ordering::Relaxed),
            write_failures: self.stats.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AggregationFunction, MemoryBackend, RetentionPolicy};
    use super::*;
    use std::time::Duration;

    const HOUR: i64 = 3600;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            operation_timeout: Duration::from_millis(200),
        }
    }

    fn engine_with(backend: Arc<MemoryBackend>, policies: Vec<RetentionPolicy>) -> StorageEngine {
        StorageEngine::new(backend, BlockCodec::default(), fast_retry(), PolicySet::new(policies))
    }

    fn hourly_avg_policy() -> RetentionPolicy {
        RetentionPolicy::new(
            "*:s",
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            AggregationFunction::Avg,
            Duration::from_secs(24 * 3600),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_range_returns_appended_samples_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), Vec::new());
        engine.register(MonitoringKey::new("total:s")).await;

        let samples: Vec<Sample> = (0..50)
            .map(|i| Sample::new(1_700_000_000 + i, (i * 7 % 13) as f64 + 0.25))
            .collect();
        for sample in &samples {
            engine.append("total:s", *sample).await.unwrap();
        }

        let stored = engine
            .range("total:s", 1_700_000_000, 1_700_000_049)
            .await
            .unwrap();
        assert_eq!(stored, samples);
        assert_eq!(backend.len("total:s").await, 50);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), Vec::new());
        engine
            .register(MonitoringKey::new("total:s").with_capacity(10))
            .await;

        for i in 0..25 {
            engine.append("total:s", Sample::new(i, i as f64)).await.unwrap();
        }

        assert_eq!(backend.len("total:s").await, 10);
        let recent = engine.recent("total:s", 100).await;
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.first().unwrap().timestamp, 15);
        let stored = engine.range("total:s", 0, 100).await.unwrap();
        assert_eq!(stored.first().unwrap().timestamp, 15);
    }

    #[tokio::test]
    async fn test_stored_values_keep_every_bit() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, Vec::new());
        engine.register(MonitoringKey::new("total:s")).await;

        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut values = vec![985.6906946328695, 212.91890726713459];
        for _ in 0..200 {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            values.push(unit * 1000.0);
        }
        for (i, value) in values.iter().enumerate() {
            engine
                .append("total:s", Sample::new(1_700_000_000 + i as i64, *value))
                .await
                .unwrap();
        }

        let stored = engine
            .range("total:s", 1_700_000_000, 1_700_000_000 + values.len() as i64)
            .await
            .unwrap();
        assert_eq!(stored.len(), values.len());
        for (sample, value) in stored.iter().zip(&values) {
            assert_eq!(sample.value.to_bits(), value.to_bits(), "value {value} changed in the store");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_within_stops_at_budget() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = StorageEngine::new(
            backend.clone(),
            BlockCodec::default(),
            RetryPolicy::default(),
            PolicySet::new(Vec::new()),
        );
        engine.register(MonitoringKey::new("total:s")).await;

        backend.set_latency(Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        let result = engine
            .append_within("total:s", Sample::new(1, 1.0), Duration::from_secs(1))
            .await;
        assert!(matches!(
            result,
            Err(StorageError::Timeout { operation: "append", timeout_ms: 1000 })
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(engine.recent("total:s", 10).await, vec![Sample::new(1, 1.0)]);
        assert_eq!(engine.stats().write_failures, 1);

        backend.set_latency(Duration::ZERO);
        engine
            .append_within("total:s", Sample::new(2, 2.0), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(backend.len("total:s").await, 2);
    }

    #[tokio::test]
    async fn test_sweep_collapses_duplicate_raw_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let codec = BlockCodec::default();
        // A retried push that the store had already taken leaves repeats
        let entries = [(100, 1.0), (101, 2.0), (101, 2.0), (102, 3.0), (102, 3.0)]
            .iter()
            .map(|(ts, value)| codec.encode_sample(&Sample::new(*ts, *value)).unwrap().to_bytes())
            .collect();
        backend.insert_entries("total:s", entries).await;

        let engine = engine_with(backend.clone(), vec![hourly_avg_policy()]);
        assert_eq!(engine.register(MonitoringKey::new("total:s")).await, 3);

        let plan = engine.sweep_key("total:s", 200).await.unwrap().unwrap();
        assert!(!plan.changed());
        assert_eq!(backend.len("total:s").await, 3);
        assert_eq!(
            engine.range("total:s", 0, 200).await.unwrap(),
            vec![Sample::new(100, 1.0), Sample::new(101, 2.0), Sample::new(102, 3.0)]
        );
    }

    #[tokio::test]
    async fn test_out_of_order_append_rejected() {
        let engine = engine_with(Arc::new(MemoryBackend::new()), Vec::new());
        engine.append("total:s", Sample::new(10, 1.0)).await.unwrap();
        assert!(matches!(
            engine.append("total:s", Sample::new(10, 2.0)).await,
            Err(StorageError::OutOfOrder { last: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_writes_are_queued_and_flushed() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), Vec::new());
        engine.register(MonitoringKey::new("total:s")).await;

        engine.append("total:s", Sample::new(1, 1.0)).await.unwrap();
        backend.set_unavailable(true);
        assert!(engine.append("total:s", Sample::new(2, 2.0)).await.is_err());
        assert!(engine.append("total:s", Sample::new(3, 3.0)).await.is_err());

        // Detection still sees the full window
        assert_eq!(engine.recent("total:s", 10).await.len(), 3);
        // Reads fall back to the live window while the store is down
        assert_eq!(engine.range("total:s", 0, 10).await.unwrap().len(), 3);

        backend.set_unavailable(false);
        engine.append("total:s", Sample::new(4, 4.0)).await.unwrap();
        assert_eq!(backend.len("total:s").await, 4);
        assert_eq!(engine.stats().write_failures, 2);
    }

    #[tokio::test]
    async fn test_register_loads_legacy_and_skips_garbage() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert_entries(
                "total:s",
                vec![
                    b"[100, 5]".to_vec(),
                    b"garbage".to_vec(),
                    b"RAW:[101,6.0]".to_vec(),
                ],
            )
            .await;
        let engine = engine_with(backend, Vec::new());
        assert!(!engine.is_registered("total:s"));

        let loaded = engine.register(MonitoringKey::new("total:s")).await;
        assert_eq!(loaded, 2);
        assert!(engine.is_registered("total:s"));
        assert_eq!(
            engine.recent("total:s", 10).await,
            vec![Sample::new(100, 5.0), Sample::new(101, 6.0)]
        );
    }

    #[tokio::test]
    async fn test_sweep_replaces_old_samples_with_bucket() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), vec![hourly_avg_policy()]);
        engine.register(MonitoringKey::new("total:s")).await;

        let base = 472_221 * HOUR;
        let now = base + 3 * HOUR;
        for (offset, value) in [(100, 10.0), (200, 20.0), (300, 30.0)] {
            engine.append("total:s", Sample::new(base + offset, value)).await.unwrap();
        }
        engine.append("total:s", Sample::new(now - 30, 1.0)).await.unwrap();

        let plan = engine.sweep_key("total:s", now).await.unwrap().unwrap();
        assert_eq!(plan.aggregated, 3);

        let old = engine.range("total:s", base, base + HOUR - 1).await.unwrap();
        assert_eq!(old, vec![Sample::new(base, 20.0)]);
        assert_eq!(backend.len("total:s").await, 1);
        assert_eq!(backend.len("total:s:aggregated").await, 1);
    }

    #[tokio::test]
    async fn test_sweep_twice_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), vec![hourly_avg_policy()]);
        engine.register(MonitoringKey::new("total:s")).await;

        let now = 1_700_020_000;
        for i in 0..300 {
            engine
                .append("total:s", Sample::new(now - 4 * HOUR + i * 40, (i % 17) as f64))
                .await
                .unwrap();
        }

        let first = engine.sweep_all(now).await;
        assert_eq!(first.keys_changed, 1);
        let after_first = backend.snapshot().await;
        let bytes_after_first = backend.total_bytes().await;

        let second = engine.sweep_all(now).await;
        assert_eq!(second.keys_swept, 1);
        assert_eq!(second.keys_changed, 0);
        assert_eq!(backend.total_bytes().await, bytes_after_first);
        assert_eq!(backend.snapshot().await, after_first);
    }

    #[tokio::test]
    async fn test_large_aggregate_blocks_are_compressed() {
        let backend = Arc::new(MemoryBackend::new());
        let policy = RetentionPolicy::new(
            "*:s",
            Duration::from_secs(60),
            Duration::from_secs(1),
            AggregationFunction::Max,
            Duration::from_secs(24 * 3600),
        )
        .unwrap();
        let engine = engine_with(backend.clone(), vec![policy]);
        engine.register(MonitoringKey::new("total:s")).await;

        for i in 0..200 {
            engine.append("total:s", Sample::new(1000 + i, 3.0)).await.unwrap();
        }
        engine.sweep_key("total:s", 5000).await.unwrap();

        let blocks = backend.read_all("total:s:aggregated").await.unwrap();
        assert!(!blocks.is_empty());
        assert!(blocks.iter().all(|b| b.starts_with(b"ZLIB:")));
        assert!(engine.stats().bytes_saved > 0);
        assert_eq!(engine.range("total:s", 0, 10_000).await.unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_sweep_without_matching_policy() {
        let engine = engine_with(Arc::new(MemoryBackend::new()), vec![hourly_avg_policy()]);
        engine.register(MonitoringKey::new("total:m")).await;
        assert!(engine.sweep_key("total:m", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_failure_is_reported_per_key() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), vec![hourly_avg_policy()]);
        engine.register(MonitoringKey::new("a:s")).await;
        engine.register(MonitoringKey::new("b:s")).await;

        backend.set_unavailable(true);
        let report = engine.sweep_all(10 * HOUR).await;
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.keys_swept, 0);
    }
}
