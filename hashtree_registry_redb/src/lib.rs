//! `RedbRegistry` — a local `RegistryApi` cache backed by `redb`, built
//! around `hashtree_core`'s `RecordKey`/`Record` rather than a
//! stream-specific key/message pair.

use bytes::Bytes;
use hashtree_core::{Record, RecordKey, RegistryApi};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::{path::Path, sync::Arc};

const TABLE: TableDefinition<(u8, &[u8]), &[u8]> = TableDefinition::new("registry");

#[derive(Clone)]
pub struct RedbRegistry {
    db: Arc<Database>,
}

impl RedbRegistry {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path.join("registry.redb"))?;

        // Create the table on open so a read on a fresh database never hits
        // a missing-table error.
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(TABLE)?;
            }
            write_txn.commit()?;
        }

        Ok(Self { db: Arc::new(db) })
    }
}

impl std::fmt::Debug for RedbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRegistry").finish()
    }
}

#[async_trait::async_trait]
impl RegistryApi for RedbRegistry {
    async fn get(&self, key: &RecordKey) -> anyhow::Result<Option<Record>> {
        let db = self.db.clone();
        let key = *key;

        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Record>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            let (key_type, key_bytes) = key.to_bytes();

            let maybe_record = table
                .get((key_type, key_bytes))?
                .map(|guard| Record::deserialize(Bytes::copy_from_slice(guard.value())))
                .transpose()?;

            Ok(maybe_record)
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb read task failed: {e}"))?
    }

    async fn set(&self, record: Record) -> anyhow::Result<()> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                let (key_type, key_bytes) = record.key.to_bytes();

                let existing = table
                    .get((key_type, key_bytes))?
                    .map(|guard| Record::deserialize(Bytes::copy_from_slice(guard.value())))
                    .transpose()?;

                if record.should_store(existing.as_ref()) {
                    table.insert((key_type, key_bytes), record.serialize().as_ref())?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb write task failed: {e}"))?
    }

    async fn delete(&self, key: &RecordKey) -> anyhow::Result<()> {
        let db = self.db.clone();
        let key = *key;

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                let (key_type, key_bytes) = key.to_bytes();
                table.remove((key_type, key_bytes))?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb delete task failed: {e}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashtree_core::{Hash, RecordKind};

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RedbRegistry::open(dir.path()).unwrap();
        let key = RecordKey::Local([1u8; 32]);
        let record = Record::new(
            RecordKind::Registry,
            key,
            1,
            Hash::from([2u8; 32]),
            Box::new([]),
            Some(Bytes::from_static(b"hello")),
        )
        .unwrap();

        registry.set(record.clone()).await.unwrap();
        assert_eq!(registry.get(&key).await.unwrap(), Some(record));

        registry.delete(&key).await.unwrap();
        assert_eq!(registry.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn older_revision_does_not_overwrite_newer() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RedbRegistry::open(dir.path()).unwrap();
        let key = RecordKey::Local([3u8; 32]);
        let newer = Record::new(RecordKind::Registry, key, 10, Hash::from([1u8; 32]), Box::new([]), None)
            .unwrap();
        let older = Record::new(RecordKind::Registry, key, 5, Hash::from([1u8; 32]), Box::new([]), None)
            .unwrap();

        registry.set(newer.clone()).await.unwrap();
        registry.set(older).await.unwrap();
        assert_eq!(registry.get(&key).await.unwrap(), Some(newer));
    }
}
