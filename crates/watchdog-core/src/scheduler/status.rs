//! Per-key status published by sampling tasks
//!
//! Each key's view is written only by that key's sampling task. The scan
//! loop and query collaborators read copies.

use crate::anomaly::AnomalyReport;
use crate::models::{AlarmPeriod, Sample};
use crate::storage::{StorageEngine, StorageError};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Closed alarm periods kept per key
pub const ALARM_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct KeyView {
    pub key: String,
    pub interval_secs: u64,
    pub max_value: f64,
    pub consecutive: u32,
    pub in_alarm: bool,
    pub alarm_start: Option<i64>,
    pub last_tick: Option<i64>,
    pub last_value: Option<f64>,
    pub storage_failing: bool,
    /// Whether the window is long enough for history-based detectors;
    /// `None` when enhanced detection is off
    pub detection_warm: Option<bool>,
    pub registered_at: i64,
    pub alarms: VecDeque<AlarmPeriod>,
    pub anomalies: AnomalyReport,
}

impl KeyView {
    pub fn new(key: &str, interval_secs: u64, max_value: f64, registered_at: i64) -> Self {
        Self {
            key: key.to_string(),
            interval_secs,
            max_value,
            consecutive: 0,
            in_alarm: false,
            alarm_start: None,
            last_tick: None,
            last_value: None,
            storage_failing: false,
            detection_warm: None,
            registered_at,
            alarms: VecDeque::new(),
            anomalies: AnomalyReport::default(),
        }
    }

    pub fn push_alarm(&mut self, period: AlarmPeriod) {
        if self.alarms.len() >= ALARM_HISTORY_CAPACITY {
            self.alarms.pop_front();
        }
        self.alarms.push_back(period);
    }

    /// No tick for `missed` intervals since the last one (or since registration)
    pub fn is_stale(&self, now: i64, missed: i64) -> bool {
        let since = self.last_tick.unwrap_or(self.registered_at);
        now - since > self.interval_secs as i64 * missed
    }
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    views: DashMap<String, KeyView>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, view: KeyView) {
        self.views.insert(view.key.clone(), view);
    }

    pub fn update(&self, key: &str, f: impl FnOnce(&mut KeyView)) {
        if let Some(mut view) = self.views.get_mut(key) {
            f(view.value_mut());
        }
    }

    pub fn get(&self, key: &str) -> Option<KeyView> {
        self.views.get(key).map(|v| v.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.views.iter().map(|v| v.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> Vec<KeyView> {
        let mut views: Vec<KeyView> = self.views.iter().map(|v| v.value().clone()).collect();
        views.sort_by(|a, b| a.key.cmp(&b.key));
        views
    }
}

/// Read-only access for reporting collaborators
#[derive(Clone)]
pub struct WatchdogQuery {
    engine: Arc<StorageEngine>,
    board: Arc<StatusBoard>,
}

impl WatchdogQuery {
    pub fn new(engine: Arc<StorageEngine>, board: Arc<StatusBoard>) -> Self {
        Self { engine, board }
    }

    pub fn keys(&self) -> Vec<String> {
        self.board.keys()
    }

    pub async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<Sample>, StorageError> {
        self.engine.range(key, start, end).await
    }

    pub fn anomaly_history(&self, key: &str) -> Option<AnomalyReport> {
        self.board.get(key).map(|v| v.anomalies)
    }

    pub fn alarm_history(&self, key: &str) -> Option<Vec<AlarmPeriod>> {
        self.board.get(key).map(|v| v.alarms.into_iter().collect())
    }

    pub fn status(&self, key: &str) -> Option<KeyView> {
        self.board.get(key)
    }

    pub fn storage_stats(&self) -> crate::storage::StorageStats {
        self.engine.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_history_is_bounded() {
        let mut view = KeyView::new("total:s", 1, 20.0, 0);
        for i in 0..(ALARM_HISTORY_CAPACITY as i64 + 5) {
            view.push_alarm(AlarmPeriod { start: i, end: i + 1 });
        }
        assert_eq!(view.alarms.len(), ALARM_HISTORY_CAPACITY);
        assert_eq!(view.alarms.front().map(|p| p.start), Some(5));
    }

    #[test]
    fn test_staleness() {
        let mut view = KeyView::new("total:m", 60, 20.0, 1_000);
        assert!(!view.is_stale(1_100, 3));
        assert!(view.is_stale(1_200, 3));
        view.last_tick = Some(1_180);
        assert!(!view.is_stale(1_200, 3));
    }

    #[test]
    fn test_board_update_and_snapshot() {
        let board = StatusBoard::new();
        board.register(KeyView::new("b:s", 1, 1.0, 0));
        board.register(KeyView::new("a:s", 1, 1.0, 0));
        board.update("a:s", |v| v.in_alarm = true);
        board.update("missing", |v| v.in_alarm = true);

        assert_eq!(board.keys(), vec!["a:s", "b:s"]);
        assert!(board.get("a:s").unwrap().in_alarm);
        assert!(!board.snapshot()[1].in_alarm);
    }
}
