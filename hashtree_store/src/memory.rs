//! An in-memory `BlockStore`, for tests and ephemeral peers that never
//! persist to disk. A `DashMap<Hash, Bytes>` guarded by no locks beyond
//! the map's own sharding, keyed by content hash rather than path.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use hashtree_core::{Hash, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::{BlockStore, StoreStats, not_found};

#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<Hash, (Bytes, u64)>,
    total_bytes: AtomicU64,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs()
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, bytes: Bytes) -> Result<Hash> {
        let hash = Hash::new(&bytes);
        if self.blocks.contains_key(&hash) {
            return Ok(hash);
        }
        self.total_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.blocks.insert(hash, (bytes, now()));
        Ok(hash)
    }

    async fn get(&self, hash: Hash) -> Result<Bytes> {
        self.blocks
            .get(&hash)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| not_found(hash))
    }

    async fn has(&self, hash: Hash) -> Result<bool> {
        Ok(self.blocks.contains_key(&hash))
    }

    async fn iter(&self) -> Result<Vec<Hash>> {
        Ok(self.blocks.iter().map(|entry| *entry.key()).collect())
    }

    async fn delete(&self, hash: Hash) -> Result<()> {
        if let Some((_, (bytes, _))) = self.blocks.remove(&hash) {
            self.total_bytes
                .fetch_sub(bytes.len() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            block_count: self.blocks.len() as u64,
        })
    }

    async fn inserted_at(&self, hash: Hash) -> Result<Option<u64>> {
        Ok(self.blocks.get(&hash).map(|entry| entry.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_idempotent_and_content_addressed() {
        let store = MemoryBlockStore::new();
        let a = store.put(Bytes::from_static(b"hello")).await.unwrap();
        let b = store.put(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stats().await.unwrap().block_count, 1);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryBlockStore::new();
        let err = store.get(Hash::new(b"nope")).await.unwrap_err();
        assert!(matches!(err, hashtree_core::HashtreeError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_reduces_total_bytes() {
        let store = MemoryBlockStore::new();
        let hash = store.put(Bytes::from_static(b"payload")).await.unwrap();
        store.delete(hash).await.unwrap();
        assert!(!store.has(hash).await.unwrap());
        assert_eq!(store.stats().await.unwrap().total_bytes, 0);
    }
}
