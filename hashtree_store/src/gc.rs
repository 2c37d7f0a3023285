//! Mark-and-sweep garbage collection over a `BlockStore`, walking the
//! block codec in `hashtree_core::block` rather than a node-specific tree
//! format, and resolving pins through `hashtree_core::Pins` instead of a
//! node-specific registry client.
//!
//! The mark phase runs before the sweep and may take a while over a large
//! tree; blocks inserted after the mark snapshot was taken must survive a
//! concurrent sweep even if nothing marked them live yet, since nothing
//! yet references them from the root set either.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use hashtree_core::{Block, Cid, Hash, HashtreeError, Pins, Result, block::decode_block, crypto};

use crate::store::BlockStore;

/// The set of blocks considered live, plus the instant the mark phase
/// started. `gc_store` treats anything inserted at or after `marked_at` as
/// live regardless of reachability, since it may not have finished being
/// linked into the tree yet.
#[derive(Debug, Default)]
pub struct RootSet {
    hashes: HashSet<Hash>,
    marked_at: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs()
}

impl RootSet {
    pub fn new() -> Self {
        Self {
            hashes: HashSet::new(),
            marked_at: now_secs(),
        }
    }

    pub fn insert(&mut self, hash: Hash) {
        self.hashes.insert(hash);
    }

    pub fn extend(&mut self, hashes: impl IntoIterator<Item = Hash>) {
        self.hashes.extend(hashes);
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Walks every block reachable from `roots`, decrypting with each `Cid`'s
/// own key where present, and returns the full set of live hashes. A block
/// that fails to decode or decrypt is treated as an unreadable subtree and
/// skipped, never as grounds for marking anything deletable — conservative
/// in the direction that never under-collects reachability.
pub async fn collect_reachable(
    store: &dyn BlockStore,
    roots: impl IntoIterator<Item = Cid>,
) -> Result<RootSet> {
    let mut set = RootSet::new();
    let mut stack: Vec<Cid> = roots.into_iter().collect();
    let mut visited: HashSet<Hash> = HashSet::new();

    while let Some(cid) = stack.pop() {
        if !visited.insert(cid.hash) {
            continue;
        }
        set.insert(cid.hash);

        let sealed = match store.get(cid.hash).await {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let plaintext = match cid.key {
            Some(key) => match crypto::open(&sealed, &key, cid.hash) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            },
            None => sealed,
        };
        let block = match decode_block(plaintext) {
            Ok(block) => block,
            Err(_) => continue,
        };

        match block {
            Block::Dir(entries) => {
                for entry in entries {
                    stack.push(entry.cid);
                }
            }
            Block::Chunked(chunks) => {
                for chunk in chunks {
                    stack.push(chunk.cid);
                }
            }
            Block::Blob(_) => {}
        }
    }

    Ok(set)
}

/// Summary of a garbage-collection run.
#[derive(Debug, Default)]
pub struct GcReport {
    pub total: usize,
    pub kept_by_pins: usize,
    pub kept_by_reachability: usize,
    pub kept_recently_inserted: usize,
    pub deleted: usize,
    pub candidates: Vec<Hash>,
}

/// Deletes every block in `store` that is neither pinned, reachable from
/// `reachable`, nor inserted at or after `reachable`'s mark time.
pub async fn gc_store(
    store: &dyn BlockStore,
    reachable: &RootSet,
    pins: &dyn Pins,
    dry_run: bool,
) -> Result<GcReport> {
    let mut report = GcReport::default();

    for hash in store.iter().await? {
        report.total += 1;

        let pinners = pins
            .get_pinners(hash)
            .await
            .map_err(|e| HashtreeError::Unavailable(format!("pin lookup failed: {e}")))?;
        if !pinners.is_empty() {
            report.kept_by_pins += 1;
            continue;
        }

        if reachable.contains(&hash) {
            report.kept_by_reachability += 1;
            continue;
        }

        if let Some(inserted_at) = store.inserted_at(hash).await? {
            if inserted_at >= reachable.marked_at {
                report.kept_recently_inserted += 1;
                continue;
            }
        }

        report.candidates.push(hash);
        if dry_run {
            continue;
        }

        store.delete(hash).await?;
        report.deleted += 1;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlockStore;
    use bytes::Bytes;
    use hashtree_core::PinContext;
    use std::collections::HashSet as StdHashSet;

    #[derive(Debug)]
    struct NoPins;

    #[async_trait::async_trait]
    impl Pins for NoPins {
        async fn pin_hash(&self, _hash: Hash, _context: PinContext) -> anyhow::Result<()> {
            Ok(())
        }
        async fn unpin_hash(&self, _hash: Hash, _context: PinContext) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn unpin_hash_all(&self, _hash: Hash) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_pinners(&self, _hash: Hash) -> anyhow::Result<StdHashSet<PinContext>> {
            Ok(StdHashSet::new())
        }
        async fn is_pinned(&self, _hash: Hash, _context: PinContext) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn unreachable_unpinned_block_is_swept() {
        let store = MemoryBlockStore::new();
        let hash = store.put(Bytes::from_static(b"orphan")).await.unwrap();
        // Ensure the mark snapshot is strictly after insertion.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let reachable = RootSet::new();
        let report = gc_store(&store, &reachable, &NoPins, false).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!store.has(hash).await.unwrap());
    }

    #[tokio::test]
    async fn reachable_root_survives_sweep() {
        let store = MemoryBlockStore::new();
        let hash = store.put(Bytes::from_static(b"root blob")).await.unwrap();
        let cid = Cid::plain(hash);
        let reachable = collect_reachable(&store, [cid]).await.unwrap();
        let report = gc_store(&store, &reachable, &NoPins, false).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(store.has(hash).await.unwrap());
    }

    #[tokio::test]
    async fn recently_inserted_block_survives_even_when_unreachable() {
        let store = MemoryBlockStore::new();
        let reachable = RootSet::new();
        // Inserted strictly after the mark snapshot was taken.
        let hash = store.put(Bytes::from_static(b"fresh")).await.unwrap();
        let report = gc_store(&store, &reachable, &NoPins, false).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(store.has(hash).await.unwrap());
    }
}
