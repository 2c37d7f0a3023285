//! A generic KV-backed `RegistryApi` cache, for backends that only offer
//! byte-key get/set/delete (object stores, KV databases) rather than a
//! dedicated table. Built around a minimal [`KvStore`] trait rather than
//! a path-keyed store, and around `hashtree_core`'s `RecordKey`/`Record`
//! rather than a stream-specific key/message pair.

use async_trait::async_trait;
use bytes::Bytes;
use hashtree_core::{Record, RecordKey, RegistryApi};
use std::sync::Arc;

/// Minimal byte-keyed storage a [`KvRegistry`] can be built on top of.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Bytes>>;
    async fn set(&self, key: &[u8], value: Bytes) -> anyhow::Result<()>;
    async fn delete(&self, key: &[u8]) -> anyhow::Result<()>;
}

/// A [`RegistryApi`] that stores each record under the hex encoding of its
/// `RecordKey` in an arbitrary [`KvStore`].
#[derive(Debug, Clone)]
pub struct KvRegistry<K> {
    store: Arc<K>,
    prefix: String,
}

impl<K: KvStore> KvRegistry<K> {
    pub fn new(store: Arc<K>, prefix: Option<String>) -> Self {
        Self {
            store,
            prefix: prefix.unwrap_or_else(|| "registry".to_string()),
        }
    }

    fn storage_key(&self, key: &RecordKey) -> Vec<u8> {
        let (key_type, key_bytes) = key.to_bytes();
        let mut full_key = Vec::with_capacity(1 + key_bytes.len());
        full_key.push(key_type);
        full_key.extend_from_slice(key_bytes);

        format!("{}/{}", self.prefix, hex::encode(full_key)).into_bytes()
    }
}

#[async_trait]
impl<K: KvStore> RegistryApi for KvRegistry<K> {
    async fn get(&self, key: &RecordKey) -> anyhow::Result<Option<Record>> {
        let storage_key = self.storage_key(key);
        match self.store.get(&storage_key).await? {
            Some(bytes) => Ok(Some(Record::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, record: Record) -> anyhow::Result<()> {
        let storage_key = self.storage_key(&record.key);
        let existing = self.get(&record.key).await?;
        if !record.should_store(existing.as_ref()) {
            return Ok(());
        }

        self.store.set(&storage_key, record.serialize()).await
    }

    async fn delete(&self, key: &RecordKey) -> anyhow::Result<()> {
        let storage_key = self.storage_key(key);
        self.store.delete(&storage_key).await
    }
}
