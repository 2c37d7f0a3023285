//! The reference resolver (C5): maps `(signer, tree-name) -> root CID`,
//! subscribes to pointer-event updates, and publishes local root changes
//! with per-key throttling. Generalizes a single directory's registry-key
//! load/save cycle into a standalone, transport-agnostic resolver shared
//! by every tree.

use crate::event::{PointerEvent, ResolverError};
use crate::publisher::{EventPublisher, EventSink, EventSubscription, SubscriptionId};
use crate::signer::Signer;
use dashmap::DashMap;
use hashtree_core::crypto::{Visibility, open, seal};
use hashtree_core::{Cid, HashtreeError, Record, RecordKey, RegistryApi};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How to recover a root key from a received pointer event's visibility
/// tags. Supply whichever secrets the caller happens to hold; recovery
/// degrades gracefully (see [`PointerEvent::visibility`]) when none apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyRecovery {
    pub link_key: Option<[u8; 32]>,
    pub self_encryption_key: Option<[u8; 32]>,
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub visibility: Visibility,
    /// Required when `visibility` is `Unlisted`.
    pub link_key: Option<[u8; 32]>,
}

/// The resolver's current best-known value for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverEntry {
    /// `None` means the tree has been deleted (tombstoned).
    pub cid: Option<Cid>,
    pub visibility: Option<Visibility>,
    pub timestamp: u64,
}

struct PendingSlot {
    record: Mutex<Option<Record>>,
}

pub struct Resolver {
    cache: Arc<dyn RegistryApi>,
    publisher: Arc<dyn EventPublisher>,
    subscription: Arc<dyn EventSubscription>,
    throttle: Duration,
    pending: Arc<DashMap<RecordKey, Arc<PendingSlot>>>,
    subscriptions: DashMap<RecordKey, SubscriptionId>,
}

impl Resolver {
    pub fn new(
        cache: Arc<dyn RegistryApi>,
        publisher: Arc<dyn EventPublisher>,
        subscription: Arc<dyn EventSubscription>,
        publish_throttle_ms: u64,
    ) -> Self {
        Self {
            cache,
            publisher,
            subscription,
            throttle: Duration::from_millis(publish_throttle_ms),
            pending: Arc::new(DashMap::new()),
            subscriptions: DashMap::new(),
        }
    }

    /// Publishes a new root for `tree_name` under `signer`'s key.
    ///
    /// With `skip_network`, only the local cache is updated — for callers
    /// (e.g. a directory actor autosaving) that have already queued their
    /// own network publish and just want the resolver's view to catch up
    /// immediately.
    pub async fn publish(
        &self,
        signer: &dyn Signer,
        tree_name: impl Into<bytes::Bytes>,
        cid: Cid,
        options: PublishOptions,
        skip_network: bool,
    ) -> Result<(), ResolverError> {
        self.apply(signer, tree_name.into(), Some((cid, options)), skip_network)
            .await
    }

    /// Publishes a tombstone for `tree_name`, cancelling any root CID still
    /// coalesced in a pending throttled publish for the same key.
    pub async fn delete(
        &self,
        signer: &dyn Signer,
        tree_name: impl Into<bytes::Bytes>,
    ) -> Result<(), ResolverError> {
        self.apply(signer, tree_name.into(), None, false).await
    }

    async fn apply(
        &self,
        signer: &dyn Signer,
        tree_name: bytes::Bytes,
        root: Option<(Cid, PublishOptions)>,
        skip_network: bool,
    ) -> Result<(), ResolverError> {
        let timestamp = now_unix();
        let mut event = PointerEvent {
            signer_pubkey: signer.public_key(),
            tree_name,
            hash: None,
            key: None,
            encrypted_key: None,
            key_id: None,
            self_encrypted_key: None,
            timestamp,
            signature: [0; 64],
        };

        if let Some((cid, options)) = root {
            event.hash = Some(cid.hash);
            apply_visibility(&mut event, cid.key, &options, signer)?;
        }

        let signature = signer
            .sign(&event.signing_bytes())
            .await
            .map_err(|e| ResolverError::InvalidEvent(format!("signing failed: {e}")))?;
        event.signature = signature;

        let record = event.into_record()?;
        let key = record.key;

        self.cache
            .set(record.clone())
            .await
            .map_err(|e| ResolverError::InvalidEvent(format!("local cache write failed: {e}")))?;

        if skip_network {
            return Ok(());
        }

        self.schedule_publish(key, record);
        Ok(())
    }

    /// Coalesces `record` into the pending publish for `key`, spawning a
    /// single delayed publish task the first time a key gains a pending
    /// entry. A later call before the deadline just replaces the stored
    /// record — the task always publishes whatever is latest when it
    /// fires, which is exactly the "first write starts the clock, every
    /// write before the deadline coalesces" throttling rule.
    fn schedule_publish(&self, key: RecordKey, record: Record) {
        let slot = self
            .pending
            .entry(key)
            .or_insert_with(|| {
                let slot = Arc::new(PendingSlot {
                    record: Mutex::new(None),
                });
                spawn_publish_task(self.throttle, key, slot.clone(), self.publisher.clone(), self.pending.clone());
                slot
            })
            .clone();

        *slot.record.lock().expect("pending slot mutex poisoned") = Some(record);
    }

    /// Returns the current best-known value for `key`, recovering the
    /// root key from whichever visibility tags the cached event carries
    /// and whatever secrets `recovery` supplies.
    pub async fn resolve(
        &self,
        key: &RecordKey,
        recovery: &KeyRecovery,
    ) -> Result<Option<ResolverEntry>, ResolverError> {
        let Some(record) = self
            .cache
            .get(key)
            .await
            .map_err(|e| ResolverError::InvalidEvent(format!("local cache read failed: {e}")))?
        else {
            return Ok(None);
        };
        Ok(Some(entry_from_record(&record, recovery)?))
    }

    /// Subscribes to `key` on the pointer-event network, reconciling every
    /// arriving event into the local cache before invoking `callback` with
    /// the resolver's latest view.
    pub async fn subscribe(
        &self,
        key: RecordKey,
        recovery: KeyRecovery,
        callback: Arc<dyn Fn(ResolverEntry) + Send + Sync>,
    ) -> anyhow::Result<SubscriptionId> {
        let cache = self.cache.clone();
        let sink: EventSink = Arc::new(move |record: Record| {
            let cache = cache.clone();
            let recovery = recovery;
            let callback = callback.clone();
            Box::pin(async move {
                if record.key != key {
                    tracing::warn!("dropping pointer event for mismatched key");
                    return;
                }
                if let Err(e) = cache.set(record).await {
                    tracing::warn!("failed to reconcile pointer event into local cache: {e}");
                    return;
                }
                let Ok(Some(record)) = cache.get(&key).await else {
                    return;
                };
                match entry_from_record(&record, &recovery) {
                    Ok(entry) => callback(entry),
                    Err(e) => tracing::warn!("failed to decode reconciled pointer event: {e}"),
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let id = self.subscription.subscribe(key, sink).await?;
        self.subscriptions.insert(key, id);
        Ok(id)
    }

    pub async fn unsubscribe(&self, key: &RecordKey) -> anyhow::Result<()> {
        if let Some((_, id)) = self.subscriptions.remove(key) {
            self.subscription.unsubscribe(id).await?;
        }
        Ok(())
    }
}

fn spawn_publish_task(
    throttle: Duration,
    key: RecordKey,
    slot: Arc<PendingSlot>,
    publisher: Arc<dyn EventPublisher>,
    pending: Arc<DashMap<RecordKey, Arc<PendingSlot>>>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(throttle).await;
        // Remove the entry before publishing so a write that lands after
        // this point starts a fresh throttle window instead of writing
        // into a slot nothing will ever drain again.
        pending.remove(&key);
        let latest = slot.record.lock().expect("pending slot mutex poisoned").take();
        if let Some(record) = latest
            && let Err(e) = publisher.publish(record).await
        {
            tracing::warn!("pointer event publish failed for a key: {e}");
        }
    });
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

fn apply_visibility(
    event: &mut PointerEvent,
    root_key: Option<[u8; 32]>,
    options: &PublishOptions,
    signer: &dyn Signer,
) -> Result<(), ResolverError> {
    match options.visibility {
        Visibility::Public => {
            event.key = root_key;
        }
        Visibility::Unlisted => {
            let root_key = root_key.ok_or_else(|| {
                ResolverError::InvalidEvent("unlisted publish requires an encrypted root".into())
            })?;
            let link_key = options.link_key.ok_or_else(|| {
                ResolverError::InvalidEvent("unlisted publish requires a link key".into())
            })?;
            event.encrypted_key =
                Some(seal(&root_key, &link_key).map_err(|e| ResolverError::InvalidEvent(e.to_string()))?);
            event.key_id = Some(hashtree_core::Hash::new(&link_key));
            event.self_encrypted_key = Some(
                seal(&root_key, &signer.self_encryption_key())
                    .map_err(|e| ResolverError::InvalidEvent(e.to_string()))?,
            );
        }
        Visibility::Private => {
            let root_key = root_key.ok_or_else(|| {
                ResolverError::InvalidEvent("private publish requires an encrypted root".into())
            })?;
            event.self_encrypted_key = Some(
                seal(&root_key, &signer.self_encryption_key())
                    .map_err(|e| ResolverError::InvalidEvent(e.to_string()))?,
            );
        }
    }
    Ok(())
}

fn entry_from_record(
    record: &Record,
    recovery: &KeyRecovery,
) -> Result<ResolverEntry, ResolverError> {
    let event = PointerEvent::from_record(record)?;
    let visibility = event.visibility();
    let root_key = recover_root_key(&event, visibility, recovery)?;
    let cid = event.hash.map(|hash| Cid { hash, key: root_key });

    Ok(ResolverEntry {
        cid,
        visibility,
        timestamp: event.timestamp,
    })
}

fn recover_root_key(
    event: &PointerEvent,
    visibility: Option<Visibility>,
    recovery: &KeyRecovery,
) -> Result<Option<[u8; 32]>, ResolverError> {
    match visibility {
        Some(Visibility::Public) => Ok(event.key),
        Some(Visibility::Unlisted) => {
            if let (Some(link_key), Some(encrypted_key)) = (recovery.link_key, &event.encrypted_key) {
                let expected_id = hashtree_core::Hash::new(&link_key);
                if event.key_id != Some(expected_id) {
                    return Ok(None);
                }
                let hash = hashtree_core::Hash::new(encrypted_key);
                return Ok(Some(open_key(encrypted_key, &link_key, hash)?));
            }
            if let (Some(self_key), Some(self_encrypted_key)) =
                (recovery.self_encryption_key, &event.self_encrypted_key)
            {
                let hash = hashtree_core::Hash::new(self_encrypted_key);
                return Ok(Some(open_key(self_encrypted_key, &self_key, hash)?));
            }
            Ok(None)
        }
        Some(Visibility::Private) => {
            if let (Some(self_key), Some(self_encrypted_key)) =
                (recovery.self_encryption_key, &event.self_encrypted_key)
            {
                let hash = hashtree_core::Hash::new(self_encrypted_key);
                return Ok(Some(open_key(self_encrypted_key, &self_key, hash)?));
            }
            Err(ResolverError::DecryptionFailed)
        }
        None => Ok(None),
    }
}

fn open_key(
    sealed: &[u8],
    key: &[u8; 32],
    hash: hashtree_core::Hash,
) -> Result<[u8; 32], ResolverError> {
    let plaintext = open(sealed, key, hash).map_err(|e: HashtreeError| match e {
        HashtreeError::DecryptionFailed(_) => ResolverError::DecryptionFailed,
        other => ResolverError::InvalidEvent(other.to_string()),
    })?;
    plaintext
        .as_ref()
        .try_into()
        .map_err(|_| ResolverError::InvalidEvent("recovered root key was not 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalSigner;
    use bytes::Bytes;
    use hashtree_core::Hash;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct MemoryRegistryApi {
        entries: Mutex<HashMap<RecordKey, Record>>,
    }

    #[async_trait::async_trait]
    impl RegistryApi for MemoryRegistryApi {
        async fn get(&self, key: &RecordKey) -> anyhow::Result<Option<Record>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, record: Record) -> anyhow::Result<()> {
            let mut entries = self.entries.lock().unwrap();
            let existing = entries.get(&record.key).cloned();
            if record.should_store(existing.as_ref()) {
                entries.insert(record.key, record);
            }
            Ok(())
        }

        async fn delete(&self, key: &RecordKey) -> anyhow::Result<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Record>>,
    }

    #[async_trait::async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, record: Record) -> anyhow::Result<()> {
            self.published.lock().unwrap().push(record);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct NoopSubscription;

    #[async_trait::async_trait]
    impl EventSubscription for NoopSubscription {
        async fn subscribe(&self, _key: RecordKey, _sink: EventSink) -> anyhow::Result<SubscriptionId> {
            Ok(SubscriptionId(0))
        }

        async fn unsubscribe(&self, _id: SubscriptionId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_resolver() -> Resolver {
        Resolver::new(
            Arc::new(MemoryRegistryApi::default()),
            Arc::new(RecordingPublisher::default()),
            Arc::new(NoopSubscription),
            3000,
        )
    }

    fn public_options() -> PublishOptions {
        PublishOptions {
            visibility: Visibility::Public,
            link_key: None,
        }
    }

    #[tokio::test]
    async fn publish_skip_network_then_resolve_returns_same_cid() {
        let resolver = test_resolver();
        let signer = LocalSigner::from_seed([1; 32]);
        let cid = Cid::plain(Hash::new(b"root bytes"));

        resolver
            .publish(&signer, Bytes::from_static(b"tree"), cid, public_options(), true)
            .await
            .unwrap();

        let key = RecordKey::PublicKeyEd25519(signer.public_key());
        let entry = resolver
            .resolve(&key, &KeyRecovery::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.cid, Some(cid));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_publishes_coalesce_to_one_network_event() {
        let publisher = Arc::new(RecordingPublisher::default());
        let resolver = Resolver::new(
            Arc::new(MemoryRegistryApi::default()),
            publisher.clone(),
            Arc::new(NoopSubscription),
            3000,
        );
        let signer = LocalSigner::from_seed([2; 32]);
        let cid1 = Cid::plain(Hash::new(b"v1"));
        let cid2 = Cid::plain(Hash::new(b"v2"));

        resolver
            .publish(&signer, Bytes::from_static(b"tree"), cid1, public_options(), false)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        resolver
            .publish(&signer, Bytes::from_static(b"tree"), cid2, public_options(), false)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(3100)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].hash, cid2.hash);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_cancels_pending_publish_sending_only_tombstone() {
        let publisher = Arc::new(RecordingPublisher::default());
        let resolver = Resolver::new(
            Arc::new(MemoryRegistryApi::default()),
            publisher.clone(),
            Arc::new(NoopSubscription),
            3000,
        );
        let signer = LocalSigner::from_seed([3; 32]);
        let cid = Cid::plain(Hash::new(b"v1"));

        resolver
            .publish(&signer, Bytes::from_static(b"tree"), cid, public_options(), false)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        resolver.delete(&signer, Bytes::from_static(b"tree")).await.unwrap();

        tokio::time::advance(Duration::from_millis(3100)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].hash, Hash::EMPTY);
    }

    #[tokio::test]
    async fn unlisted_round_trip_recovers_root_key_only_with_link_key() {
        let resolver = test_resolver();
        let signer = LocalSigner::from_seed([4; 32]);
        let link_key = [9u8; 32];
        let root_key = [5u8; 32];
        let cid = Cid::encrypted(Hash::new(b"encrypted root block"), root_key);

        resolver
            .publish(
                &signer,
                Bytes::from_static(b"tree"),
                cid,
                PublishOptions {
                    visibility: Visibility::Unlisted,
                    link_key: Some(link_key),
                },
                true,
            )
            .await
            .unwrap();

        let key = RecordKey::PublicKeyEd25519(signer.public_key());

        let with_link = resolver
            .resolve(
                &key,
                &KeyRecovery {
                    link_key: Some(link_key),
                    self_encryption_key: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(with_link.cid.unwrap().key, Some(root_key));

        let locked = resolver
            .resolve(&key, &KeyRecovery::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locked.cid.unwrap().key, None);
    }
}
