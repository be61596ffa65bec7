//! In-process backing store
//!
//! Holds lists in memory with the same semantics as the Redis backend. Used
//! for embedding and tests; it can simulate an unreachable or slow store.

use super::{StorageError, TimeSeriesBackend};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    lists: RwLock<HashMap<String, Vec<Vec<u8>>>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Seed a list with entries written by someone else
    pub async fn insert_entries(&self, list: &str, entries: Vec<Vec<u8>>) {
        self.lists
            .write()
            .await
            .entry(list.to_string())
            .or_default()
            .extend(entries);
    }

    /// Number of entries in a list
    pub async fn len(&self, list: &str) -> usize {
        self.lists.read().await.get(list).map_or(0, Vec::len)
    }

    /// Total stored bytes across all lists
    pub async fn total_bytes(&self) -> usize {
        self.lists
            .read()
            .await
            .values()
            .flat_map(|entries| entries.iter().map(Vec::len))
            .sum()
    }

    /// Copy of all lists, for comparing store contents
    pub async fn snapshot(&self) -> HashMap<String, Vec<Vec<u8>>> {
        self.lists.read().await.clone()
    }

    async fn simulate(&self) -> Result<(), StorageError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory backend offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesBackend for MemoryBackend {
    async fn push_bounded(
        &self,
        list: &str,
        entries: Vec<Vec<u8>>,
        max_len: usize,
    ) -> Result<(), StorageError> {
        self.simulate().await?;
        let mut lists = self.lists.write().await;
        let stored = lists.entry(list.to_string()).or_default();
        stored.extend(entries);
        if stored.len() > max_len {
            let excess = stored.len() - max_len;
            stored.drain(..excess);
        }
        Ok(())
    }

    async fn read_all(&self, list: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        self.simulate().await?;
        Ok(self.lists.read().await.get(list).cloned().unwrap_or_default())
    }

    async fn replace(&self, lists: Vec<(String, Vec<Vec<u8>>)>) -> Result<(), StorageError> {
        self.simulate().await?;
        let mut stored = self.lists.write().await;
        for (list, entries) in lists {
            if entries.is_empty() {
                stored.remove(&list);
            } else {
                stored.insert(list, entries);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_bounded_keeps_newest() {
        let backend = MemoryBackend::new();
        for i in 0..5u8 {
            backend.push_bounded("k", vec![vec![i]], 3).await.unwrap();
        }
        assert_eq!(
            backend.read_all("k").await.unwrap(),
            vec![vec![2], vec![3], vec![4]]
        );
    }

    #[tokio::test]
    async fn test_replace_and_missing_lists() {
        let backend = MemoryBackend::new();
        assert!(backend.read_all("missing").await.unwrap().is_empty());

        backend.insert_entries("a", vec![vec![1], vec![2]]).await;
        backend
            .replace(vec![("a".into(), Vec::new()), ("b".into(), vec![vec![9]])])
            .await
            .unwrap();
        assert_eq!(backend.len("a").await, 0);
        assert_eq!(backend.read_all("b").await.unwrap(), vec![vec![9]]);
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);
        assert!(matches!(
            backend.read_all("k").await,
            Err(StorageError::Unavailable(_))
        ));
        backend.set_unavailable(false);
        assert!(backend.read_all("k").await.is_ok());
    }
}
