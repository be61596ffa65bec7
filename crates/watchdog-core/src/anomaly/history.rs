//! Bounded per-key anomaly history

use crate::models::{AnomalyCategory, AnomalyEvent};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone)]
pub struct AnomalyHistory {
    events: VecDeque<AnomalyEvent>,
    capacity: usize,
    /// Times each category fired, over the key's lifetime
    distribution: BTreeMap<AnomalyCategory, u64>,
    total: u64,
}

/// Read-only view handed to reporting collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub events: Vec<AnomalyEvent>,
    pub distribution: BTreeMap<AnomalyCategory, u64>,
    pub total: u64,
}

impl AnomalyHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            distribution: BTreeMap::new(),
            total: 0,
        }
    }

    /// Append an event, evicting the oldest when full
    pub fn record(&mut self, event: AnomalyEvent) {
        for category in &event.triggered_types {
            *self.distribution.entry(*category).or_insert(0) += 1;
        }
        self.total += 1;
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn latest(&self) -> Option<&AnomalyEvent> {
        self.events.back()
    }

    pub fn events(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.events.iter()
    }

    pub fn report(&self) -> AnomalyReport {
        AnomalyReport {
            events: self.events.iter().cloned().collect(),
            distribution: self.distribution.clone(),
            total: self.total,
        }
    }
}

impl Default for AnomalyHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use std::collections::BTreeSet;

    fn event(timestamp: i64, categories: &[AnomalyCategory]) -> AnomalyEvent {
        AnomalyEvent {
            timestamp,
            key: "total:s".to_string(),
            value: 1.0,
            triggered_types: categories.iter().copied().collect::<BTreeSet<_>>(),
            confidence_score: 0.6,
            severity: Severity::Medium,
        }
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut history = AnomalyHistory::new(3);
        for ts in 0..5 {
            history.record(event(ts, &[AnomalyCategory::Spike]));
        }
        let timestamps: Vec<i64> = history.events().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![2, 3, 4]);
        assert_eq!(history.latest().map(|e| e.timestamp), Some(4));
    }

    #[test]
    fn test_distribution_outlives_eviction() {
        let mut history = AnomalyHistory::new(1);
        history.record(event(1, &[AnomalyCategory::Spike, AnomalyCategory::Threshold]));
        history.record(event(2, &[AnomalyCategory::Spike]));

        let report = history.report();
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.total, 2);
        assert_eq!(report.distribution[&AnomalyCategory::Spike], 2);
        assert_eq!(report.distribution[&AnomalyCategory::Threshold], 1);
    }
}
