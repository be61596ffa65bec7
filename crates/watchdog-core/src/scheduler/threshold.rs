//! Consecutive-violation tracking
//!
//! The counter grows on every sample above `max_value` and resets on any
//! sample at or below it. The alarm is raised once, on the sample that brings
//! the counter to `consecutive_duration`, and clears after `reset_duration`
//! consecutive samples at or below the maximum. A cleared alarm is re-armed.

use crate::models::{AlarmPeriod, Sample, ThresholdConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdTransition {
    Raised { consecutive: u32 },
    Cleared(AlarmPeriod),
}

#[derive(Debug, Clone)]
pub struct ThresholdTracker {
    max_value: f64,
    consecutive_duration: u32,
    reset_duration: u32,
    consecutive: u32,
    quiet: u32,
    alarm_start: Option<i64>,
}

impl ThresholdTracker {
    pub fn new(config: &ThresholdConfig) -> Self {
        Self {
            max_value: config.max_value,
            consecutive_duration: config.consecutive_duration.max(1),
            reset_duration: config.reset_duration.max(1),
            consecutive: 0,
            quiet: 0,
            alarm_start: None,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn in_alarm(&self) -> bool {
        self.alarm_start.is_some()
    }

    pub fn alarm_start(&self) -> Option<i64> {
        self.alarm_start
    }

    pub fn observe(&mut self, sample: &Sample) -> Option<ThresholdTransition> {
        if sample.value > self.max_value {
            self.consecutive = self.consecutive.saturating_add(1);
            self.quiet = 0;
            if self.alarm_start.is_none() && self.consecutive == self.consecutive_duration {
                self.alarm_start = Some(sample.timestamp);
                return Some(ThresholdTransition::Raised {
                    consecutive: self.consecutive,
                });
            }
            return None;
        }

        self.consecutive = 0;
        let start = self.alarm_start?;
        self.quiet += 1;
        if self.quiet < self.reset_duration {
            return None;
        }
        self.quiet = 0;
        self.alarm_start = None;
        Some(ThresholdTransition::Cleared(AlarmPeriod {
            start,
            end: sample.timestamp,
        }))
    }
}
