//! Time-series storage
//!
//! This module provides:
//! - A backing-store abstraction over append-only lists (Redis or in-memory)
//! - Block encoding with optional zlib compression and a legacy decode path
//! - Bounded retry with per-operation timeouts
//! - Tiered retention: raw samples collapse into aggregate buckets, then expire
//! - The storage engine tying these together per monitored key

mod backend;
mod codec;
mod engine;
mod redis_store;
mod retention;
mod retry;

pub use backend::MemoryBackend;
pub use codec::{BlockCodec, BlockEncoding, CompressionConfig, StoredBlock};
pub use engine::{StorageEngine, StorageStats, SweepReport};
pub use redis_store::RedisBackend;
pub use retention::{apply_policy, AggregateBucket, AggregationFunction, PolicySet, RetentionPolicy, SweepPlan};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage operation '{operation}' timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("undecodable block: {0}")]
    Codec(String),

    #[error("sample at {timestamp} for '{key}' is not after the last stored sample at {last}")]
    OutOfOrder {
        key: String,
        timestamp: i64,
        last: i64,
    },

    #[error("storage operation '{operation}' abandoned after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        last: Box<StorageError>,
    },
}

impl StorageError {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout { .. } | StorageError::Redis(_) | StorageError::Unavailable(_)
        )
    }
}

/// Remote key-value store holding lists of encoded entries
///
/// Every list is ordered oldest first.
#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    /// Append entries to a list, then keep only its newest `max_len` entries
    async fn push_bounded(
        &self,
        list: &str,
        entries: Vec<Vec<u8>>,
        max_len: usize,
    ) -> Result<(), StorageError>;

    /// Read a whole list; a missing list is empty
    async fn read_all(&self, list: &str) -> Result<Vec<Vec<u8>>, StorageError>;

    /// Atomically replace the contents of several lists
    async fn replace(&self, lists: Vec<(String, Vec<Vec<u8>>)>) -> Result<(), StorageError>;
}
