//! Redb-backed persistent store.
//!
//! Implements [`Store`] over a single redb table. Structured keys sort
//! lexicographically, so prefix scans are plain range queries.

use crate::{Store, StoreError};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Durable store backend over an embedded redb database.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    ///
    /// The records table is created eagerly so the first read cannot
    /// fail on a missing table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Database(e.to_string()))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        {
            write_txn
                .open_table(RECORDS)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl Store for RedbStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            table
                .insert(key, value)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(RECORDS)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let value = table
            .get(key)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(RECORDS)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let range = table
            .range(prefix..)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut rows = Vec::new();
        for item in range {
            let (k, v) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_string(), v.value().to_vec()));
        }

        Ok(rows)
    }
}
