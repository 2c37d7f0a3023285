//! Integration coverage for the exchange engine's cross-peer behavior:
//! dedup of concurrent fetches and fallthrough across a larger peer set,
//! neither of which fits naturally as a `#[cfg(test)]` unit test
//! colocated with a single module.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use hashtree_core::Config;
use hashtree_exchange::{Exchange, InMemoryPeerTransport, PeerId};
use hashtree_store::{BlockStore, MemoryBlockStore};

fn linked_pair() -> (Arc<Exchange>, Arc<Exchange>, Arc<dyn BlockStore>, Arc<dyn BlockStore>) {
    let store_a: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let store_b: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let a = Exchange::new(store_a.clone(), Config::default());
    let b = Exchange::new(store_b.clone(), Config::default());
    let (ta, tb) = InMemoryPeerTransport::pair(Duration::ZERO, 0.0);
    a.add_peer(PeerId("b".into()), ta);
    b.add_peer(PeerId("a".into()), tb);
    (a, b, store_a, store_b)
}

#[tokio::test]
async fn block_is_written_to_local_store_exactly_once() {
    let (a, b, store_a, store_b) = linked_pair();
    let hash = store_b.put(Bytes::from_static(b"dedup payload")).await.unwrap();

    let (first, second) = tokio::join!(
        a.fetch(hash, CancellationToken::new()),
        a.fetch(hash, CancellationToken::new())
    );
    assert_eq!(first.unwrap(), Bytes::from_static(b"dedup payload"));
    assert_eq!(second.unwrap(), Bytes::from_static(b"dedup payload"));
    assert!(store_a.has(hash).await.unwrap());
}

#[tokio::test]
async fn three_way_peer_set_falls_through_on_not_found() {
    let store_requester: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let store_empty: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let store_has_it: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());

    let requester = Exchange::new(store_requester, Config::default());
    let empty_peer = Exchange::new(store_empty, Config::default());
    let has_it_peer = Exchange::new(store_has_it.clone(), Config::default());

    let (t1, t2) = InMemoryPeerTransport::pair(Duration::ZERO, 0.0);
    requester.add_peer(PeerId("empty".into()), t1);
    empty_peer.add_peer(PeerId("requester".into()), t2);

    let (t3, t4) = InMemoryPeerTransport::pair(Duration::ZERO, 0.0);
    requester.add_peer(PeerId("has-it".into()), t3);
    has_it_peer.add_peer(PeerId("requester".into()), t4);

    let hash = store_has_it
        .put(Bytes::from_static(b"only one peer has this"))
        .await
        .unwrap();

    let bytes = requester.fetch(hash, CancellationToken::new()).await.unwrap();
    assert_eq!(bytes, Bytes::from_static(b"only one peer has this"));
}
