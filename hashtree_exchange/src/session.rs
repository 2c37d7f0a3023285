//! The exchange engine (C6): answers `fetch(hash)` by asking connected
//! peers in round-robin order, deduplicating concurrent callers onto a
//! single outbound `REQUEST`, and never itself escalating
//! a local miss past what C3 already holds when acting as a responder —
//! that one-hop rule is what keeps the peer graph loop-free.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use hashtree_core::{Config, Hash};
use hashtree_store::BlockStore;

use crate::error::ExchangeError;
use crate::frame::Frame;
use crate::peer::{FetchOutcome, Peer, PeerId};
use crate::transport::{BufferLevel, PeerTransport};

enum PeerResponse {
    Found(bytes::Bytes),
    NotFound,
}

pub struct Exchange {
    store: Arc<dyn BlockStore>,
    config: Config,
    peers: DashMap<PeerId, Arc<Peer>>,
    rr_cursor: AtomicUsize,
    next_req_id: AtomicU64,
    pending_requests: DashMap<(PeerId, u64), oneshot::Sender<PeerResponse>>,
    pending_fetches: DashMap<Hash, broadcast::Sender<FetchOutcome>>,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl Exchange {
    pub fn new(store: Arc<dyn BlockStore>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            peers: DashMap::new(),
            rr_cursor: AtomicUsize::new(0),
            next_req_id: AtomicU64::new(1),
            pending_requests: DashMap::new(),
            pending_fetches: DashMap::new(),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Registers a connected peer and spawns its inbound frame loop. All
    /// data the transport delivers is forwarded as-is into this engine.
    pub fn add_peer(self: &Arc<Self>, id: PeerId, transport: Arc<dyn PeerTransport>) {
        let peer = Arc::new(Peer::new(
            id.clone(),
            transport.clone(),
            self.config.peer_inflight_limit,
        ));
        self.peers.insert(id.clone(), peer);
        let engine = self.clone();
        tokio::spawn(async move { engine.recv_loop(id, transport).await });
    }

    /// Drops a peer, cancelling any requests outstanding on it by
    /// resolving them as a local `NotFound` so the requester falls through
    /// to the next peer.
    pub fn remove_peer(&self, id: &PeerId) {
        let Some((_, peer)) = self.peers.remove(id) else {
            return;
        };
        let stuck: Vec<_> = self
            .pending_requests
            .iter()
            .filter(|entry| &entry.key().0 == id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in stuck {
            if let Some((_, tx)) = self.pending_requests.remove(&key) {
                let _ = tx.send(PeerResponse::NotFound);
            }
        }
        let transport = peer.transport.clone();
        tokio::spawn(async move { transport.close().await });
    }

    async fn recv_loop(self: Arc<Self>, id: PeerId, transport: Arc<dyn PeerTransport>) {
        while let Some(bytes) = transport.recv().await {
            let wire_len = bytes.len();
            match Frame::decode(bytes) {
                Ok(frame) => self.handle_frame(&id, frame, wire_len).await,
                Err(err) => {
                    tracing::warn!(peer = %id, %err, "malformed frame, resetting session");
                    self.remove_peer(&id);
                    return;
                }
            }
        }
        self.remove_peer(&id);
    }

    async fn handle_frame(&self, id: &PeerId, frame: Frame, wire_len: usize) {
        let Some(peer) = self.peers.get(id).map(|entry| entry.value().clone()) else {
            return;
        };
        match frame {
            Frame::Request { req_id, hash } => {
                peer.stats.record_request_received(wire_len);
                let reply = match self.store.get(hash).await {
                    Ok(bytes) => Frame::Response { req_id, bytes },
                    Err(_) => Frame::NotFound { req_id },
                };
                let is_response = matches!(reply, Frame::Response { .. });
                if is_response && peer.transport.buffer_level() == BufferLevel::High {
                    // Small frames (NOT_FOUND, CANCEL, REQUEST) may still
                    // proceed; an unbounded RESPONSE must wait for
                    // buffer-low. The requester's own timeout reselects a
                    // peer, so dropping here rather than queuing is safe.
                    tracing::debug!(peer = %id, %hash, "peer buffer high, dropping response frame");
                    return;
                }
                let reply_len = reply.wire_len();
                peer.transport.send(reply.encode()).await;
                if is_response {
                    peer.stats.record_response_sent(reply_len);
                } else {
                    peer.stats.record_other_sent(reply_len);
                }
            }
            Frame::Response { req_id, bytes } => {
                peer.stats.record_response_received(wire_len);
                if let Some((_, tx)) = self.pending_requests.remove(&(id.clone(), req_id)) {
                    let _ = tx.send(PeerResponse::Found(bytes));
                }
            }
            Frame::NotFound { req_id } => {
                peer.stats.record_other_received(wire_len);
                if let Some((_, tx)) = self.pending_requests.remove(&(id.clone(), req_id)) {
                    let _ = tx.send(PeerResponse::NotFound);
                }
            }
            Frame::Cancel { req_id } => {
                // Nothing async is in flight on the responder side once the
                // store read above has already completed, so there is
                // nothing to actually cancel; just account for the frame.
                peer.stats.record_other_received(wire_len);
                let _ = req_id;
            }
        }
    }

    /// Fetches `hash`, checking the local store first and only then
    /// falling through to the peer set. Concurrent callers for the same
    /// missing hash share a single outbound `REQUEST`.
    pub async fn fetch(
        self: &Arc<Self>,
        hash: Hash,
        cancel: CancellationToken,
    ) -> Result<bytes::Bytes, ExchangeError> {
        if let Ok(bytes) = self.store.get(hash).await {
            return Ok(bytes);
        }

        let mut rx = match self.pending_fetches.entry(hash) {
            Entry::Occupied(entry) => entry.get().subscribe(),
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                let engine = self.clone();
                tokio::spawn(async move { engine.run_fetch(hash, tx).await });
                rx
            }
        };

        tokio::select! {
            outcome = rx.recv() => match outcome {
                Ok(FetchOutcome::Found(bytes)) => Ok(bytes),
                Ok(FetchOutcome::Unavailable) | Err(_) => {
                    Err(ExchangeError::Unavailable(format!("block {hash} unavailable")))
                }
            },
            _ = cancel.cancelled() => Err(ExchangeError::Cancelled),
        }
    }

    async fn run_fetch(self: Arc<Self>, hash: Hash, tx: broadcast::Sender<FetchOutcome>) {
        let outcome = self.try_peers(hash).await;
        self.pending_fetches.remove(&hash);

        let result = match outcome {
            Ok(bytes) => {
                let _ = self.store.put(bytes.clone()).await;
                FetchOutcome::Found(bytes)
            }
            Err(err) => {
                tracing::debug!(%hash, %err, "fetch exhausted all peers");
                FetchOutcome::Unavailable
            }
        };
        let _ = tx.send(result);
    }

    /// Round-robins across connected peers, trying the next on
    /// `NOT_FOUND` or timeout, until one answers or all are exhausted
    /// answers or all are exhausted.
    async fn try_peers(&self, hash: Hash) -> Result<bytes::Bytes, ExchangeError> {
        let peer_ids: Vec<PeerId> = self.peers.iter().map(|entry| entry.key().clone()).collect();
        if peer_ids.is_empty() {
            return Err(ExchangeError::Unavailable("no connected peers".into()));
        }

        let start = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % peer_ids.len();
        let mut queue: VecDeque<&PeerId> = peer_ids.iter().collect();
        queue.rotate_left(start);

        for id in queue {
            let Some(peer) = self.peers.get(id).map(|entry| entry.value().clone()) else {
                continue;
            };
            match self.request_from_peer(&peer, hash).await {
                Ok(Some(bytes)) => return Ok(bytes),
                Ok(None) => continue,
                Err(_) => continue,
            }
        }
        Err(ExchangeError::Unavailable(format!(
            "no connected peer has block {hash}"
        )))
    }

    async fn request_from_peer(
        &self,
        peer: &Arc<Peer>,
        hash: Hash,
    ) -> Result<Option<bytes::Bytes>, ExchangeError> {
        let _permit = peer
            .inflight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExchangeError::Unavailable("peer inflight limit closed".into()))?;

        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_requests.insert((peer.id.clone(), req_id), tx);

        let request = Frame::Request { req_id, hash };
        let wire_len = request.wire_len();
        peer.transport.send(request.encode()).await;
        peer.stats.record_request_sent(wire_len);

        let timeout = Duration::from_millis(self.config.peer_request_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(PeerResponse::Found(bytes))) => Ok(Some(bytes)),
            Ok(Ok(PeerResponse::NotFound)) => Ok(None),
            Ok(Err(_)) => Err(ExchangeError::Unavailable(
                "peer dropped before responding".into(),
            )),
            Err(_) => {
                self.pending_requests.remove(&(peer.id.clone(), req_id));
                let cancel = Frame::Cancel { req_id };
                let cancel_len = cancel.wire_len();
                peer.transport.send(cancel.encode()).await;
                peer.stats.record_other_sent(cancel_len);
                Err(ExchangeError::Unavailable("peer request timed out".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryPeerTransport;
    use hashtree_store::MemoryBlockStore;

    fn link(a: &Arc<Exchange>, b: &Arc<Exchange>, a_id: PeerId, b_id: PeerId) {
        let (ta, tb) = InMemoryPeerTransport::pair(Duration::ZERO, 0.0);
        a.add_peer(b_id, ta);
        b.add_peer(a_id, tb);
    }

    #[tokio::test]
    async fn fetch_from_single_peer_round_trips() {
        let store_a: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let store_b: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let hash = store_b.put(bytes::Bytes::from_static(b"hello")).await.unwrap();

        let a = Exchange::new(store_a.clone(), Config::default());
        let b = Exchange::new(store_b, Config::default());
        link(&a, &b, PeerId("a".into()), PeerId("b".into()));

        let bytes = a.fetch(hash, CancellationToken::new()).await.unwrap();
        assert_eq!(bytes, bytes::Bytes::from_static(b"hello"));
        assert!(store_a.has(hash).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_fetches_dedup_to_one_request() {
        let store_a: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let store_b: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let hash = store_b.put(bytes::Bytes::from_static(b"shared")).await.unwrap();

        let a = Exchange::new(store_a, Config::default());
        let b = Exchange::new(store_b, Config::default());
        link(&a, &b, PeerId("a".into()), PeerId("b".into()));

        let (r1, r2) = tokio::join!(
            a.fetch(hash, CancellationToken::new()),
            a.fetch(hash, CancellationToken::new())
        );
        assert_eq!(r1.unwrap(), bytes::Bytes::from_static(b"shared"));
        assert_eq!(r2.unwrap(), bytes::Bytes::from_static(b"shared"));

        let peer_b_stats = b.peers.get(&PeerId("a".into())).unwrap().stats.snapshot();
        assert_eq!(peer_b_stats.requests_received, 1);
    }

    #[tokio::test]
    async fn not_found_everywhere_is_unavailable() {
        let store_a: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let store_b: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());

        let mut config = Config::default();
        config.peer_request_timeout_ms = 50;
        let a = Exchange::new(store_a, config.clone());
        let b = Exchange::new(store_b, config);
        link(&a, &b, PeerId("a".into()), PeerId("b".into()));

        let missing = Hash::new(b"nowhere");
        let err = a.fetch(missing, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn fetch_with_no_peers_is_unavailable() {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let a = Exchange::new(store, Config::default());
        let err = a
            .fetch(Hash::new(b"x"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn cancellation_returns_cancelled() {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let a = Exchange::new(store, Config::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = a.fetch(Hash::new(b"x"), cancel).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Cancelled));
    }
}
