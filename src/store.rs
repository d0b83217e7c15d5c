//! The persistence boundary.
//!
//! The crate does not persist anything itself; the driver hands completed
//! [`Metadata`] records to whatever implements [`Store`]. `exists` is only
//! advisory: two drivers racing on the same hash may both call `insert`, and
//! the store has to tolerate the duplicate.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::metadata::Metadata;

/// Failure of a store operation. The driver treats `exists` failures as
/// fatal and `insert` failures as losses of a single record.
#[derive(Debug, Error)]
#[error("store: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What the driver needs from a persistence backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether a torrent with this info-hash is already stored.
    async fn exists(&self, info_hash: &[u8; 20]) -> Result<bool, StoreError>;

    /// Persists one completed record.
    async fn insert(&self, metadata: Metadata) -> Result<(), StoreError>;

    /// Flushes and releases the backend.
    async fn close(&self) -> Result<(), StoreError>;
}

/// An in-memory store: useful as a default for short-lived runs and as the
/// backend in tests.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<[u8; 20], Metadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn get(&self, info_hash: &[u8; 20]) -> Option<Metadata> {
        self.records.read().get(info_hash).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, info_hash: &[u8; 20]) -> Result<bool, StoreError> {
        Ok(self.records.read().contains_key(info_hash))
    }

    async fn insert(&self, metadata: Metadata) -> Result<(), StoreError> {
        self.records.write().insert(metadata.info_hash, metadata);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TorrentFile;

    fn record(info_hash: [u8; 20]) -> Metadata {
        Metadata {
            info_hash,
            name: "example".into(),
            files: vec![TorrentFile {
                path: "example".into(),
                size: 1,
            }],
            total_size: 1,
            discovered_on: 1700000000,
        }
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(!store.exists(&[1; 20]).await.unwrap());

        store.insert(record([1; 20])).await.unwrap();
        assert!(store.exists(&[1; 20]).await.unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&[1; 20]).unwrap().name, "example");
    }

    #[tokio::test]
    async fn duplicate_insert_is_tolerated() {
        // `exists` is advisory; a racing duplicate insert must not fail.
        let store = MemoryStore::new();
        store.insert(record([2; 20])).await.unwrap();
        store.insert(record([2; 20])).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
