//! In-memory store backend.
//!
//! An ordered map behind a read-write lock. This is the default backend
//! for single-process deployments and the fake the registry tests run
//! against.

use crate::{Store, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Ordered in-process key/value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();

        store.put("a", b"1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));

        // Overwrite
        store.put("a", b"2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"2".to_vec()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);

        // Deleting an absent key succeeds
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemoryStore::new();

        store.put("member\0room\0c1", b"a").await.unwrap();
        store.put("member\0room\0c2", b"b").await.unwrap();
        store.put("member\0other\0c3", b"c").await.unwrap();
        store.put("connection\0c1", b"d").await.unwrap();

        let rows = store.scan_prefix("member\0room\0").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "member\0room\0c1");
        assert_eq!(rows[1].0, "member\0room\0c2");

        let all_members = store.scan_prefix("member\0").await.unwrap();
        assert_eq!(all_members.len(), 3);

        assert!(store.scan_prefix("missing\0").await.unwrap().is_empty());
    }
}
