//! Connection registry.
//!
//! Tracks which live connections belong to which users. Records are
//! durable: each operation goes straight to the injected store, keyed
//! by connection identity with a secondary user-identity index so that
//! direct routing can resolve a user to their connections with one
//! prefix scan.

use courier_store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A connection identifier, opaque and assigned by the transport layer.
pub type ConnectionId = String;

/// A logical user identity, assigned by the auth collaborator.
pub type UserId = String;

fn connection_key(connection_id: &str) -> String {
    format!("connection\0{}", connection_id)
}

fn user_index_key(user_id: &str, connection_id: &str) -> String {
    format!("user\0{}\0{}", user_id, connection_id)
}

fn user_index_prefix(user_id: &str) -> String {
    format!("user\0{}\0", user_id)
}

/// A live connection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Connection identity.
    pub connection_id: ConnectionId,
    /// Owning user identity.
    pub user_id: UserId,
}

fn decode_record(raw: &[u8]) -> Result<Connection, StoreError> {
    serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Registry of live connections.
///
/// At most one record exists per connection identity. All operations
/// are idempotent single-key writes; duplicate or reordered lifecycle
/// events are harmless.
#[derive(Clone)]
pub struct ConnectionStore {
    store: Arc<dyn Store>,
}

impl ConnectionStore {
    /// Create a registry over the given store handle.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a live connection. Overwrite semantics: a connect event
    /// for a known connection identity silently replaces prior state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn put(&self, connection_id: &str, user_id: &str) -> Result<(), StoreError> {
        // If the identity was previously held by a different user, the
        // old index row must not survive the overwrite.
        if let Some(existing) = self.get(connection_id).await? {
            if existing.user_id != user_id {
                self.store
                    .delete(&user_index_key(&existing.user_id, connection_id))
                    .await?;
            }
        }

        let record = Connection {
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
        };
        let value =
            serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.store.put(&connection_key(connection_id), &value).await?;
        self.store
            .put(&user_index_key(user_id, connection_id), &value)
            .await?;

        debug!(connection = %connection_id, user = %user_id, "Connection registered");
        Ok(())
    }

    /// Remove a connection record. Succeeds even if absent - a
    /// double-disconnect must not fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        if let Some(existing) = self.get(connection_id).await? {
            self.store
                .delete(&user_index_key(&existing.user_id, connection_id))
                .await?;
        }
        self.store.delete(&connection_key(connection_id)).await?;

        debug!(connection = %connection_id, "Connection removed");
        Ok(())
    }

    /// Fetch a single connection record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the record is
    /// corrupt.
    pub async fn get(&self, connection_id: &str) -> Result<Option<Connection>, StoreError> {
        match self.store.get(&connection_key(connection_id)).await? {
            Some(raw) => Ok(Some(decode_record(&raw)?)),
            None => Ok(None),
        }
    }

    /// All live connections owned by `user_id`. An empty result is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn find_by_user(&self, user_id: &str) -> Result<Vec<Connection>, StoreError> {
        self.store
            .scan_prefix(&user_index_prefix(user_id))
            .await?
            .iter()
            .map(|(_, raw)| decode_record(raw))
            .collect()
    }

    /// Number of live connection records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.store.scan_prefix("connection\0").await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_store::MemoryStore;

    fn registry() -> ConnectionStore {
        ConnectionStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let connections = registry();

        connections.put("conn-1", "alice").await.unwrap();
        let record = connections.get("conn-1").await.unwrap().unwrap();
        assert_eq!(record.user_id, "alice");
        assert_eq!(connections.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_user() {
        let connections = registry();

        connections.put("conn-1", "alice").await.unwrap();
        connections.put("conn-2", "alice").await.unwrap();
        connections.put("conn-3", "bob").await.unwrap();

        let found = connections.find_by_user("alice").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.user_id == "alice"));

        assert!(connections.find_by_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let connections = registry();

        connections.put("conn-1", "alice").await.unwrap();
        connections.delete("conn-1").await.unwrap();
        assert!(connections.get("conn-1").await.unwrap().is_none());
        assert!(connections.find_by_user("alice").await.unwrap().is_empty());

        // Second delete finds nothing and still succeeds.
        connections.delete("conn-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_moves_user_index() {
        let connections = registry();

        connections.put("conn-1", "alice").await.unwrap();
        connections.put("conn-1", "bob").await.unwrap();

        assert!(connections.find_by_user("alice").await.unwrap().is_empty());
        let found = connections.find_by_user("bob").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(connections.count().await.unwrap(), 1);
    }
}
