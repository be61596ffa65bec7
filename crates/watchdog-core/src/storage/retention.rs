//! Tiered retention
//!
//! Raw samples older than a policy's raw retention collapse into fixed-width
//! buckets; buckets older than the archive retention are dropped. Planning is
//! pure so the engine only touches the backing store when something changed.

use crate::config::ConfigError;
use crate::models::Sample;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Reduction applied to the samples of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunction {
    Avg,
    Max,
    Min,
    Sum,
    Count,
    First,
    Last,
    /// Drop expired raw samples without keeping an aggregate
    Remove,
}

impl FromStr for AggregationFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avg" | "average" | "mean" => Ok(AggregationFunction::Avg),
            "max" => Ok(AggregationFunction::Max),
            "min" => Ok(AggregationFunction::Min),
            "sum" => Ok(AggregationFunction::Sum),
            "count" => Ok(AggregationFunction::Count),
            "first" => Ok(AggregationFunction::First),
            "last" => Ok(AggregationFunction::Last),
            "remove" => Ok(AggregationFunction::Remove),
            other => Err(format!("unknown aggregation function '{other}'")),
        }
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationFunction::Avg => "avg",
            AggregationFunction::Max => "max",
            AggregationFunction::Min => "min",
            AggregationFunction::Sum => "sum",
            AggregationFunction::Count => "count",
            AggregationFunction::First => "first",
            AggregationFunction::Last => "last",
            AggregationFunction::Remove => "remove",
        };
        f.write_str(name)
    }
}

impl AggregationFunction {
    /// Reduce samples in timestamp order; `None` for an empty slice or `Remove`
    pub fn reduce(&self, samples: &[Sample]) -> Option<f64> {
        let values = samples.iter().map(|s| s.value);
        match self {
            _ if samples.is_empty() => None,
            AggregationFunction::Avg => Some(values.sum::<f64>() / samples.len() as f64),
            AggregationFunction::Max => values.reduce(f64::max),
            AggregationFunction::Min => values.reduce(f64::min),
            AggregationFunction::Sum => Some(values.sum()),
            AggregationFunction::Count => Some(samples.len() as f64),
            AggregationFunction::First => samples.first().map(|s| s.value),
            AggregationFunction::Last => samples.last().map(|s| s.value),
            AggregationFunction::Remove => None,
        }
    }

    /// Fold a later partial bucket into an existing one
    fn merge(&self, existing: &AggregateBucket, later: &AggregateBucket) -> AggregateBucket {
        let count = existing.count + later.count;
        let value = match self {
            AggregationFunction::Avg => {
                (existing.value * existing.count as f64 + later.value * later.count as f64)
                    / count as f64
            }
            AggregationFunction::Max => existing.value.max(later.value),
            AggregationFunction::Min => existing.value.min(later.value),
            AggregationFunction::Sum | AggregationFunction::Count => existing.value + later.value,
            AggregationFunction::First => existing.value,
            AggregationFunction::Last | AggregationFunction::Remove => later.value,
        };
        AggregateBucket { count, value, ..*existing }
    }
}

/// A resolution-reduced run of samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    #[serde(rename = "t")]
    pub start: i64,
    /// Bucket width in seconds
    #[serde(rename = "r")]
    pub resolution: i64,
    #[serde(rename = "v")]
    pub value: f64,
    /// Raw samples folded into the bucket
    #[serde(rename = "n")]
    pub count: u64,
}

impl AggregateBucket {
    pub fn end(&self) -> i64 {
        self.start + self.resolution
    }

    /// Whether any part of the bucket falls inside `[start, end]`
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start <= end && self.end() > start
    }

    /// Queries see a bucket as one sample at its start
    pub fn as_sample(&self) -> Sample {
        Sample::new(self.start, self.value)
    }
}

/// Retention rule for keys matching a wildcard pattern
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub raw_retention: Duration,
    pub resolution: Duration,
    pub function: AggregationFunction,
    pub archive_retention: Duration,
    pattern: String,
    matcher: GlobMatcher,
}

impl RetentionPolicy {
    pub fn new(
        key_pattern: &str,
        raw_retention: Duration,
        resolution: Duration,
        function: AggregationFunction,
        archive_retention: Duration,
    ) -> Result<Self, ConfigError> {
        let matcher = Glob::new(key_pattern)
            .map_err(|e| ConfigError::InvalidRetention {
                entry: key_pattern.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        Ok(Self {
            raw_retention,
            resolution,
            function,
            archive_retention,
            pattern: key_pattern.to_string(),
            matcher,
        })
    }

    /// Built-in tiers for second, minute and hour keys
    pub fn defaults() -> Vec<Self> {
        const HOUR: u64 = 3600;
        [
            ("*:s", HOUR, 60, 24 * HOUR),
            ("*:m", 24 * HOUR, 600, 7 * 24 * HOUR),
            ("*:h", 7 * 24 * HOUR, 3600, 30 * 24 * HOUR),
        ]
        .into_iter()
        .filter_map(|(pattern, raw, resolution, archive)| {
            Self::new(
                pattern,
                Duration::from_secs(raw),
                Duration::from_secs(resolution),
                AggregationFunction::Avg,
                Duration::from_secs(archive),
            )
            .ok()
        })
        .collect()
    }

    pub fn key_pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    /// Ordering key for conflict resolution; larger is more specific
    fn specificity(&self) -> (bool, usize, std::cmp::Reverse<usize>) {
        let wildcards = self
            .pattern
            .chars()
            .filter(|c| matches!(c, '*' | '?' | '[' | '{'))
            .count();
        let literals = self.pattern.chars().count() - wildcards;
        (wildcards == 0, literals, std::cmp::Reverse(wildcards))
    }
}

/// Ordered set of policies with most-specific-wins selection
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<RetentionPolicy>,
}

impl PolicySet {
    pub fn new(policies: Vec<RetentionPolicy>) -> Self {
        Self { policies }
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn policies(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    /// The most specific matching policy; ties keep the first declared
    pub fn select(&self, key: &str) -> Option<&RetentionPolicy> {
        let mut best: Option<&RetentionPolicy> = None;
        let mut tied = false;

        for policy in self.policies.iter().filter(|p| p.matches(key)) {
            match best {
                None => best = Some(policy),
                Some(current) => match policy.specificity().cmp(&current.specificity()) {
                    std::cmp::Ordering::Greater => {
                        best = Some(policy);
                        tied = false;
                    }
                    std::cmp::Ordering::Equal => tied = true,
                    std::cmp::Ordering::Less => {}
                },
            }
        }

        if tied {
            if let Some(chosen) = best {
                warn!(
                    key = %key,
                    pattern = %chosen.key_pattern(),
                    "Equally specific retention policies match key, using the first declared"
                );
            }
        }
        best
    }
}

/// Result of applying a policy to one key's stored series
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    /// Raw samples still inside raw retention
    pub raw: Vec<Sample>,
    /// Aggregates still inside archive retention, oldest first
    pub aggregates: Vec<AggregateBucket>,
    /// Raw samples folded into aggregates
    pub aggregated: usize,
    /// Raw samples and buckets dropped outright
    pub removed: usize,
}

impl SweepPlan {
    pub fn changed(&self) -> bool {
        self.aggregated > 0 || self.removed > 0
    }
}

/// Plan one sweep over a key's raw samples and existing aggregates at `now`
pub fn apply_policy(
    policy: &RetentionPolicy,
    raw: Vec<Sample>,
    aggregates: Vec<AggregateBucket>,
    now: i64,
) -> SweepPlan {
    let raw_cutoff = now - policy.raw_retention.as_secs() as i64;
    let archive_cutoff = now - policy.archive_retention.as_secs() as i64;
    let resolution = (policy.resolution.as_secs() as i64).max(1);

    let (expired, kept): (Vec<Sample>, Vec<Sample>) =
        raw.into_iter().partition(|s| s.timestamp < raw_cutoff);

    let mut buckets: BTreeMap<(i64, i64), AggregateBucket> = aggregates
        .into_iter()
        .map(|b| ((b.start, b.resolution), b))
        .collect();

    let mut aggregated = 0;
    let mut removed = 0;

    if policy.function == AggregationFunction::Remove {
        removed += expired.len();
    } else {
        let mut groups: BTreeMap<i64, Vec<Sample>> = BTreeMap::new();
        for sample in expired {
            let start = sample.timestamp.div_euclid(resolution) * resolution;
            groups.entry(start).or_default().push(sample);
        }

        for (start, mut samples) in groups {
            samples.sort_by_key(|s| s.timestamp);
            let Some(value) = policy.function.reduce(&samples) else {
                continue;
            };
            aggregated += samples.len();
            let partial = AggregateBucket {
                start,
                resolution,
                value,
                count: samples.len() as u64,
            };
            buckets
                .entry((start, resolution))
                .and_modify(|existing| *existing = policy.function.merge(existing, &partial))
                .or_insert(partial);
        }
    }

    let before = buckets.len();
    buckets.retain(|_, b| b.end() > archive_cutoff);
    removed += before - buckets.len();

    SweepPlan {
        raw: kept,
        aggregates: buckets.into_values().collect(),
        aggregated,
        removed,
    }
}
