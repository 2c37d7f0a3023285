//! Peer identity and the per-peer handle the exchange engine drives.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::stats::PeerStats;
use crate::transport::PeerTransport;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a pending `get(hash)` resolves to once every requester sharing it
/// is woken.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(Bytes),
    Unavailable,
}

/// One connected peer: its transport, traffic counters, and the semaphore
/// bounding `peer_inflight_limit` concurrent outstanding requests.
pub struct Peer {
    pub id: PeerId,
    pub transport: Arc<dyn PeerTransport>,
    pub stats: Arc<PeerStats>,
    pub inflight: Arc<Semaphore>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("id", &self.id).finish()
    }
}

impl Peer {
    pub fn new(id: PeerId, transport: Arc<dyn PeerTransport>, inflight_limit: usize) -> Self {
        Self {
            id,
            transport,
            stats: Arc::new(PeerStats::default()),
            inflight: Arc::new(Semaphore::new(inflight_limit)),
        }
    }
}
