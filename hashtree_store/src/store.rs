//! The `BlockStore` trait (C3): the one stateful singleton in the system.
//! All operations are atomic; `put` of an already-present hash is a
//! no-op.

use async_trait::async_trait;
use bytes::Bytes;
use hashtree_core::{Hash, HashtreeError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub total_bytes: u64,
    pub block_count: u64,
}

#[async_trait]
pub trait BlockStore: Send + Sync + std::fmt::Debug {
    /// Stores `bytes`, keyed by its hash. Idempotent.
    async fn put(&self, bytes: Bytes) -> Result<Hash>;

    /// Returns the bytes for `hash`, or `NotFound`.
    async fn get(&self, hash: Hash) -> Result<Bytes>;

    async fn has(&self, hash: Hash) -> Result<bool>;

    /// All hashes currently stored. Used by GC's sweep phase; callers that
    /// only need a liveness check should prefer `has`.
    async fn iter(&self) -> Result<Vec<Hash>>;

    /// Removes `hash` unconditionally. Only the garbage collector should
    /// call this directly; application code expresses intent through pins
    /// and the resolver, not by deleting blocks itself.
    async fn delete(&self, hash: Hash) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;

    /// The unix-second insertion time of `hash`, if present. Used by GC to
    /// exclude blocks inserted after a mark snapshot was taken.
    async fn inserted_at(&self, hash: Hash) -> Result<Option<u64>>;
}

/// Reads a block and fails with a clear `NotFound` message when absent,
/// rather than leaving callers to disambiguate a bare `Option` or empty
/// `Bytes`.
pub(crate) fn not_found(hash: Hash) -> HashtreeError {
    HashtreeError::NotFound(format!("block {hash}"))
}
