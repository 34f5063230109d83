//! # courier-store
//!
//! Keyed storage boundary for the courier relay.
//!
//! The registry never talks to a concrete database. It is handed a
//! [`Store`]: a flat map of string keys to opaque byte values with a
//! prefix range scan. Keys are structured by the caller (type
//! discriminator plus identity fields, NUL-separated), which makes the
//! scan the only query primitive the relay needs.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`] - ordered in-process map, the default backend and
//!   the test double
//! - [`RedbStore`] - embedded redb database for durable deployments

pub mod memory;
pub mod redb;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redb::RedbStore;

/// Storage errors.
///
/// Store failures are never masked by the relay core; they propagate as
/// the failure of the event being processed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Record (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A flat keyed store with prefix scans.
///
/// All operations are single-key upserts or deletes: duplicate or
/// out-of-order application of the same lifecycle event is harmless.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite the value under `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Fetch the value under `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove the value under `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}
