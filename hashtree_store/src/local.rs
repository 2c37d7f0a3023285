//! A filesystem-backed `BlockStore`, sharded two hex characters deep so a
//! single directory never holds more than a few hundred entries, using a
//! traversal-guarded path resolver and `create_dir_all`-on-write, the
//! same directory-sharding approach applied to hash-addressed blocks
//! rather than path-addressed blobs.

use async_trait::async_trait;
use bytes::Bytes;
use hashtree_core::{Hash, HashtreeError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::{BlockStore, StoreStats, not_found};

#[derive(Debug)]
pub struct FsBlockStore {
    base_path: PathBuf,
    total_bytes: AtomicU64,
}

/// Two levels of two-hex-character directories keep any one directory
/// under a few hundred entries even at several million blocks.
fn shard_path(base: &Path, hash: Hash) -> PathBuf {
    let hex = hash.to_hex();
    base.join(&hex[0..2]).join(&hex[2..4]).join(&hex[4..])
}

fn io_err(err: std::io::Error, what: &str) -> HashtreeError {
    HashtreeError::Unavailable(format!("{what}: {err}"))
}

impl FsBlockStore {
    /// Opens (creating if absent) a block store rooted at `base_path`.
    pub async fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path)
            .await
            .map_err(|e| io_err(e, "creating block store directory"))?;
        let total_bytes = AtomicU64::new(Self::sum_existing(&base_path).await?);
        Ok(Self {
            base_path,
            total_bytes,
        })
    }

    async fn sum_existing(base_path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut stack = vec![base_path.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(e, "scanning block store directory")),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_err(e, "reading block store entry"))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_err(e, "reading block store entry type"))?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else {
                    total += entry
                        .metadata()
                        .await
                        .map_err(|e| io_err(e, "reading block store entry metadata"))?
                        .len();
                }
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl BlockStore for FsBlockStore {
    async fn put(&self, bytes: Bytes) -> Result<Hash> {
        let hash = Hash::new(&bytes);
        let path = shard_path(&self.base_path, hash);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(e, "checking existing block"))?
        {
            return Ok(hash);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(e, "creating shard directory"))?;
        }
        let len = bytes.len() as u64;
        // Write to a temp file and rename, so a crash mid-write never
        // leaves a block that hashes to something other than its name.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| io_err(e, "writing block"))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| io_err(e, "finalizing block"))?;
        self.total_bytes.fetch_add(len, Ordering::Relaxed);
        Ok(hash)
    }

    async fn get(&self, hash: Hash) -> Result<Bytes> {
        let path = shard_path(&self.base_path, hash);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(hash)),
            Err(e) => Err(io_err(e, "reading block")),
        }
    }

    async fn has(&self, hash: Hash) -> Result<bool> {
        let path = shard_path(&self.base_path, hash);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(e, "checking block"))
    }

    async fn iter(&self) -> Result<Vec<Hash>> {
        let mut hashes = Vec::new();
        let mut stack = vec![self.base_path.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_err(e, "listing block store"))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_err(e, "reading block store entry"))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_err(e, "reading block store entry type"))?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                if let Some(hash) = hash_from_shard_path(&self.base_path, &entry.path()) {
                    hashes.push(hash);
                }
            }
        }
        Ok(hashes)
    }

    async fn delete(&self, hash: Hash) -> Result<()> {
        let path = shard_path(&self.base_path, hash);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| io_err(e, "deleting block"))?;
                self.total_bytes.fetch_sub(meta.len(), Ordering::Relaxed);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e, "deleting block")),
        }
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            block_count: self.iter().await?.len() as u64,
        })
    }

    async fn inserted_at(&self, hash: Hash) -> Result<Option<u64>> {
        let path = shard_path(&self.base_path, hash);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map_err(|e| io_err(e, "reading block mtime"))?;
                let secs = modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                Ok(Some(secs))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e, "reading block mtime")),
        }
    }
}

/// Reconstructs the hash encoded by a shard path's three-level hex split.
/// Temp files from in-progress writes carry a `.tmp` extension and are
/// skipped, since they don't decode to a valid hash.
fn hash_from_shard_path(base: &Path, path: &Path) -> Option<Hash> {
    let rel = path.strip_prefix(base).ok()?;
    let hex: String = rel.iter().map(|part| part.to_str().unwrap_or("")).collect();
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(Hash::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_sharded_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::open(dir.path()).await.unwrap();
        let hash = store.put(Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(store.get(hash).await.unwrap(), Bytes::from_static(b"payload"));
        assert!(store.has(hash).await.unwrap());
        assert_eq!(store.iter().await.unwrap(), vec![hash]);
    }

    #[tokio::test]
    async fn reopening_recovers_total_bytes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsBlockStore::open(dir.path()).await.unwrap();
            store.put(Bytes::from_static(b"abcdef")).await.unwrap();
        }
        let reopened = FsBlockStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.stats().await.unwrap().total_bytes, 6);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::open(dir.path()).await.unwrap();
        let hash = store.put(Bytes::from_static(b"x")).await.unwrap();
        store.delete(hash).await.unwrap();
        store.delete(hash).await.unwrap();
        assert!(!store.has(hash).await.unwrap());
    }
}
