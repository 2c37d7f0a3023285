//! The pinned set (one of the GC liveness root set's sources): an
//! explicit, application-controlled "keep this tree alive" mechanism, on
//! top of whatever trees are already kept alive by ownership or
//! subscription.

use crate::Hash;
use crate::record::{Record, RecordKey, RecordKind};
use crate::registry_api::RegistryApi;
use anyhow::{Result, anyhow};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A caller-supplied tag identifying *why* a hash is pinned, so that
/// multiple independent pinners of the same block don't clobber each
/// other's pin when one of them unpins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PinContext(pub Box<[u8]>);

impl PinContext {
    pub fn named(name: impl Into<Vec<u8>>) -> Self {
        Self(name.into().into_boxed_slice())
    }
}

#[async_trait::async_trait]
pub trait Pins: Sync + Send + std::fmt::Debug {
    async fn pin_hash(&self, hash: Hash, context: PinContext) -> Result<()>;

    /// Returns `true` if the hash now has no remaining pinners.
    async fn unpin_hash(&self, hash: Hash, context: PinContext) -> Result<bool>;

    async fn unpin_hash_all(&self, hash: Hash) -> Result<()>;

    async fn get_pinners(&self, hash: Hash) -> Result<HashSet<PinContext>>;

    async fn is_pinned(&self, hash: Hash, context: PinContext) -> Result<bool>;
}

/// `Pins` backed by a [`RegistryApi`]: pin sets are stored as CBOR-free,
/// length-prefixed byte lists keyed by `RecordKey::Blake3HashPin(hash)`.
#[derive(Clone, Debug)]
pub struct RegistryPinner<R> {
    registry: Arc<R>,
    write_locks: [Arc<Mutex<()>>; 64],
}

impl<R: RegistryApi + Send + Sync + 'static> RegistryPinner<R> {
    pub fn new(registry: R) -> Self {
        let locks = std::array::from_fn(|_| Arc::new(Mutex::new(())));
        Self {
            registry: Arc::new(registry),
            write_locks: locks,
        }
    }

    pub fn registry_arc(&self) -> Arc<dyn RegistryApi + Send + Sync> {
        self.registry.clone() as Arc<dyn RegistryApi + Send + Sync>
    }

    fn lock_for_hash(&self, hash: Hash) -> Arc<Mutex<()>> {
        let index = hash.as_bytes()[0] as usize % self.write_locks.len();
        self.write_locks[index].clone()
    }

    fn hash_to_key(&self, hash: Hash) -> RecordKey {
        RecordKey::Blake3HashPin(hash.into())
    }

    async fn get_internal(&self, key: &RecordKey) -> Result<(HashSet<PinContext>, u64)> {
        if let Some(record) = self.registry.get(key).await? {
            let pinners = match &record.data {
                Some(data) => decode_pin_contexts(data)
                    .map_err(|e| anyhow!("pin set decode failed: {e}"))?,
                None => HashSet::new(),
            };
            Ok((pinners, record.revision))
        } else {
            Ok((HashSet::new(), 0))
        }
    }

    async fn save_internal(
        &self,
        key: RecordKey,
        pinners: HashSet<PinContext>,
        new_revision: u64,
    ) -> Result<()> {
        if pinners.is_empty() {
            return self.registry.delete(&key).await;
        }
        let mut pinners_vec: Vec<PinContext> = pinners.into_iter().collect();
        pinners_vec.sort();
        let data: Bytes = encode_pin_contexts(&pinners_vec).into();
        let hash = Hash::new(&data);
        let record = Record::new(
            RecordKind::Registry,
            key,
            new_revision,
            hash,
            Box::new([]),
            Some(data),
        )?;
        self.registry.set(record).await
    }
}

fn encode_pin_contexts(contexts: &[PinContext]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(contexts.len() as u32).to_be_bytes());
    for ctx in contexts {
        out.extend_from_slice(&(ctx.0.len() as u16).to_be_bytes());
        out.extend_from_slice(&ctx.0);
    }
    out
}

fn decode_pin_contexts(bytes: &[u8]) -> Result<HashSet<PinContext>, &'static str> {
    if bytes.len() < 4 {
        return Err("truncated pin set header");
    }
    let count = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut offset = 4;
    let mut out = HashSet::with_capacity(count);
    for _ in 0..count {
        if bytes.len() < offset + 2 {
            return Err("truncated pin entry length");
        }
        let len = u16::from_be_bytes(bytes[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        if bytes.len() < offset + len {
            return Err("truncated pin entry");
        }
        out.insert(PinContext(bytes[offset..offset + len].to_vec().into_boxed_slice()));
        offset += len;
    }
    Ok(out)
}

#[async_trait::async_trait]
impl<R: RegistryApi + Send + Sync + std::fmt::Debug + 'static> Pins for RegistryPinner<R> {
    async fn pin_hash(&self, hash: Hash, context: PinContext) -> Result<()> {
        let lock = self.lock_for_hash(hash);
        let _guard = lock.lock().await;
        let key = self.hash_to_key(hash);
        let (mut pinners, revision) = self.get_internal(&key).await?;
        pinners.insert(context);
        self.save_internal(key, pinners, revision + 1).await
    }

    async fn unpin_hash(&self, hash: Hash, context: PinContext) -> Result<bool> {
        let lock = self.lock_for_hash(hash);
        let _guard = lock.lock().await;
        let key = self.hash_to_key(hash);
        let (mut pinners, revision) = self.get_internal(&key).await?;
        if !pinners.remove(&context) {
            return Ok(pinners.is_empty());
        }
        let is_empty = pinners.is_empty();
        self.save_internal(key, pinners, revision + 1).await?;
        Ok(is_empty)
    }

    async fn unpin_hash_all(&self, hash: Hash) -> Result<()> {
        let lock = self.lock_for_hash(hash);
        let _guard = lock.lock().await;
        let key = self.hash_to_key(hash);
        let (pinners, revision) = self.get_internal(&key).await?;
        if pinners.is_empty() {
            return Ok(());
        }
        self.save_internal(key, HashSet::new(), revision + 1).await
    }

    async fn get_pinners(&self, hash: Hash) -> Result<HashSet<PinContext>> {
        let key = self.hash_to_key(hash);
        Ok(self.get_internal(&key).await?.0)
    }

    async fn is_pinned(&self, hash: Hash, context: PinContext) -> Result<bool> {
        let key = self.hash_to_key(hash);
        Ok(self.get_internal(&key).await?.0.contains(&context))
    }
}
