//! A single-node stand-in for the pointer-event network. This workspace
//! has no concrete real-network `PeerTransport` — `hashtree_exchange`
//! ships only an in-memory test double for one — so there is nothing yet
//! for the CLI to dial out to. Publishing here only ever reaches the
//! resolver's own local cache, and subscribing never receives anything
//! from outside this process.

use async_trait::async_trait;
use hashtree_core::{Record, RecordKey};
use hashtree_registry::{EventPublisher, EventSink, EventSubscription, SubscriptionId};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LocalOnlyPublisher;

#[async_trait]
impl EventPublisher for LocalOnlyPublisher {
    async fn publish(&self, _record: Record) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LocalOnlySubscription {
    next_id: AtomicU64,
}

#[async_trait]
impl EventSubscription for LocalOnlySubscription {
    async fn subscribe(&self, _key: RecordKey, _sink: EventSink) -> anyhow::Result<SubscriptionId> {
        Ok(SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn unsubscribe(&self, _id: SubscriptionId) -> anyhow::Result<()> {
        Ok(())
    }
}
