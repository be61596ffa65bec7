//! Counter sources
//!
//! The capture process publishes one counter per monitored key; sampling
//! tasks pull the current value once per tick.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("counter source unavailable: {0}")]
    Unavailable(String),

    #[error("counter for '{key}' is not a number: {raw}")]
    Malformed { key: String, raw: String },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Pull interface for live counter values
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Current value for `key`; a counter never written reads as zero
    async fn read(&self, key: &str) -> Result<f64, SourceError>;
}

/// Counters published in-process
#[derive(Debug, Default)]
pub struct SharedCounters {
    values: DashMap<String, f64>,
    offline: AtomicBool,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) {
        self.values.remove(key);
    }

    /// Make every read fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl CounterSource for SharedCounters {
    async fn read(&self, key: &str) -> Result<f64, SourceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("shared counters offline".to_string()));
        }
        Ok(self.values.get(key).map_or(0.0, |v| *v))
    }
}

/// Counters kept in Redis string keys `{prefix}{key}`
#[derive(Clone)]
pub struct RedisCounterSource {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisCounterSource {
    pub const DEFAULT_PREFIX: &'static str = "counter:";

    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            prefix: Self::DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CounterSource for RedisCounterSource {
    async fn read(&self, key: &str) -> Result<f64, SourceError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(self.counter_key(key)).await?;
        match raw {
            None => Ok(0.0),
            Some(raw) => parse_counter(key, &raw),
        }
    }
}

fn parse_counter(key: &str, raw: &str) -> Result<f64, SourceError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SourceError::Malformed {
            key: key.to_string(),
            raw: raw.to_string(),
        })
}
