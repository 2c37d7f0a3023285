//! The storage-agnostic interface the reference resolver (C5) and the
//! pinned-set bookkeeping (C3) are built on.
//!
//! Implementations decide how a [`Record`] is persisted and propagated;
//! correct ones only ever keep the record that wins [`Record::should_store`].

use crate::record::{Record, RecordKey};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RegistryApi: std::fmt::Debug + Send + Sync {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>>;

    /// Publishes `record`. Implementations respecting `should_store`
    /// semantics silently drop a record that does not beat the one they
    /// currently hold; they never propagate the error as their own
    /// failure (that bookkeeping belongs to the resolver, not the store).
    async fn set(&self, record: Record) -> Result<()>;

    async fn delete(&self, key: &RecordKey) -> Result<()>;
}

#[async_trait]
impl<T: RegistryApi + ?Sized + Send + Sync> RegistryApi for std::sync::Arc<T> {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        (**self).get(key).await
    }

    async fn set(&self, record: Record) -> Result<()> {
        (**self).set(record).await
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        (**self).delete(key).await
    }
}

#[async_trait]
impl<T: RegistryApi + ?Sized + Send + Sync> RegistryApi for Box<T> {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        (**self).get(key).await
    }

    async fn set(&self, record: Record) -> Result<()> {
        (**self).set(record).await
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        (**self).delete(key).await
    }
}
