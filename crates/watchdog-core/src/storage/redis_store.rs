//! Redis backing store
//!
//! Series are Redis lists, oldest entry at the head. A single
//! `ConnectionManager` is shared by every task; clones are cheap handles to
//! the same multiplexed connection.

use super::{StorageError, TimeSeriesBackend};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::info;

#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect to `redis_url`, e.g. `redis://127.0.0.1:6379/0`
    pub async fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        info!(url = %redis_url, "Connected to Redis backing store");
        Ok(Self { manager })
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Handle to the shared connection
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl TimeSeriesBackend for RedisBackend {
    async fn push_bounded(
        &self,
        list: &str,
        entries: Vec<Vec<u8>>,
        max_len: usize,
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let keep = max_len.max(1) as isize;
        redis::pipe()
            .atomic()
            .rpush(list, entries)
            .ignore()
            .ltrim(list, -keep, -1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_all(&self, list: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        let mut conn = self.manager.clone();
        let entries: Vec<Vec<u8>> = conn.lrange(list, 0, -1).await?;
        Ok(entries)
    }

    async fn replace(&self, lists: Vec<(String, Vec<Vec<u8>>)>) -> Result<(), StorageError> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (list, entries) in lists {
            pipe.del(&list).ignore();
            if !entries.is_empty() {
                pipe.rpush(&list, entries).ignore();
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
