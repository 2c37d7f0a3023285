//! Abstract network boundary for pointer events. The resolver depends only
//! on these traits — never on a concrete transport or on C6 — so an
//! embedder can back it with anything from a signed-event relay network to
//! an in-process test double.

use async_trait::async_trait;
use hashtree_core::{Record, RecordKey};
use std::future::Future;
use std::pin::Pin;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, record: Record) -> anyhow::Result<()>;
}

/// Invoked once per accepted event for a subscribed key. Async because
/// reconciling an incoming event against the local cache requires an
/// await.
pub type EventSink = std::sync::Arc<
    dyn Fn(Record) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

#[async_trait]
pub trait EventSubscription: Send + Sync {
    async fn subscribe(&self, key: RecordKey, sink: EventSink) -> anyhow::Result<SubscriptionId>;
    async fn unsubscribe(&self, id: SubscriptionId) -> anyhow::Result<()>;
}
