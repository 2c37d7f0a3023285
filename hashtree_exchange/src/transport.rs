//! `PeerTransport` (C7): the abstract per-peer connection C6 sends frames
//! over. A concrete WebRTC data-channel implementation is an external
//! collaborator out of scope for this crate; [`InMemoryPeerTransport`] is
//! the deterministic double the rest of this crate's test suite drives
//! against.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify, mpsc};
use std::sync::Mutex as StdMutex;

use hashtree_core::config::{DEFAULT_PEER_QUEUE_MAX_BYTES, DEFAULT_PEER_QUEUE_MAX_ITEMS};

/// Connection lifecycle. `Failed` is a synonym of `Closed` a higher layer
/// may elect to retry against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Creating,
    Connecting,
    Connected,
    Closing,
    Closed,
    Failed,
}

/// Backpressure signal C6 polls before sending more data down a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLevel {
    Low,
    High,
}

#[async_trait]
pub trait PeerTransport: Send + Sync + std::fmt::Debug {
    /// Queues `frame` for send, subject to the per-peer outbound cap;
    /// never blocks (overflow is handled by dropping the oldest queued
    /// frame).
    async fn send(&self, frame: Bytes);

    /// The next frame received from the peer, or `None` once closed and
    /// drained.
    async fn recv(&self) -> Option<Bytes>;

    fn state(&self) -> PeerState;

    fn buffer_level(&self) -> BufferLevel;

    /// Drops the outbound queue and marks the transport closed, which
    /// implicitly cancels outbound traffic still queued.
    async fn close(&self);
}

struct Queue {
    items: VecDeque<Bytes>,
    bytes: usize,
}

/// Two linked in-memory transports, one per end of a simulated peer
/// session, with configurable induced latency and random drop.
pub struct InMemoryPeerTransport {
    state: StdMutex<PeerState>,
    queue: Mutex<Queue>,
    not_empty: Notify,
    high_water: AtomicBool,
    max_items: usize,
    max_bytes: usize,
    peer_tx: mpsc::UnboundedSender<Bytes>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for InMemoryPeerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPeerTransport")
            .field("state", &*self.state.lock().unwrap())
            .finish()
    }
}

impl InMemoryPeerTransport {
    /// Builds a linked pair, `(a, b)`, where frames sent on `a` arrive on
    /// `b`'s `recv` and vice versa. `latency` delays delivery; `drop_rate`
    /// (0.0..=1.0) randomly discards a queued frame instead of delivering
    /// it, simulating a lossy link.
    pub fn pair(latency: Duration, drop_rate: f64) -> (Arc<Self>, Arc<Self>) {
        Self::pair_with_caps(
            latency,
            drop_rate,
            DEFAULT_PEER_QUEUE_MAX_ITEMS,
            DEFAULT_PEER_QUEUE_MAX_BYTES as usize,
        )
    }

    pub fn pair_with_caps(
        latency: Duration,
        drop_rate: f64,
        max_items: usize,
        max_bytes: usize,
    ) -> (Arc<Self>, Arc<Self>) {
        let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
        let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();

        let a = Arc::new(Self::new(max_items, max_bytes, a_to_b_tx, b_to_a_rx));
        let b = Arc::new(Self::new(max_items, max_bytes, b_to_a_tx, a_to_b_rx));

        *a.state.lock().unwrap() = PeerState::Connected;
        *b.state.lock().unwrap() = PeerState::Connected;

        tokio::spawn(drain_loop(a.clone(), latency, drop_rate));
        tokio::spawn(drain_loop(b.clone(), latency, drop_rate));

        (a, b)
    }

    fn new(
        max_items: usize,
        max_bytes: usize,
        peer_tx: mpsc::UnboundedSender<Bytes>,
        inbound_rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            state: StdMutex::new(PeerState::Creating),
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                bytes: 0,
            }),
            not_empty: Notify::new(),
            high_water: AtomicBool::new(false),
            max_items,
            max_bytes,
            peer_tx,
            inbound_rx: Mutex::new(inbound_rx),
            closed: AtomicBool::new(false),
        }
    }

    fn update_watermark(&self, queue: &Queue) {
        let high = queue.items.len() * 4 >= self.max_items * 3
            || queue.bytes * 4 >= self.max_bytes * 3;
        let low = queue.items.len() * 4 <= self.max_items
            && queue.bytes * 4 <= self.max_bytes;
        if high {
            self.high_water.store(true, Ordering::Relaxed);
        } else if low {
            self.high_water.store(false, Ordering::Relaxed);
        }
    }
}

async fn drain_loop(transport: Arc<InMemoryPeerTransport>, latency: Duration, drop_rate: f64) {
    loop {
        let frame = {
            let mut queue = transport.queue.lock().await;
            match queue.items.pop_front() {
                Some(frame) => {
                    queue.bytes = queue.bytes.saturating_sub(frame.len());
                    transport.update_watermark(&queue);
                    Some(frame)
                }
                None => None,
            }
        };

        let frame = match frame {
            Some(frame) => frame,
            None => {
                if transport.closed.load(Ordering::Relaxed) {
                    return;
                }
                transport.not_empty.notified().await;
                continue;
            }
        };

        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        if drop_rate > 0.0 && sample_drop(drop_rate) {
            tracing::warn!("in-memory transport dropped a frame (simulated loss)");
            continue;
        }

        if transport.peer_tx.send(frame).is_err() {
            return;
        }
    }
}

/// A cheap, dependency-free coin flip; good enough for a test double that
/// never needs cryptographic randomness.
fn sample_drop(drop_rate: f64) -> bool {
    use std::sync::atomic::{AtomicU64, Ordering};
    static STATE: AtomicU64 = AtomicU64::new(0x9E3779B97F4A7C15);
    let mut x = STATE.load(Ordering::Relaxed);
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    STATE.store(x, Ordering::Relaxed);
    (x as f64 / u64::MAX as f64) < drop_rate
}

#[async_trait]
impl PeerTransport for InMemoryPeerTransport {
    async fn send(&self, frame: Bytes) {
        let mut queue = self.queue.lock().await;
        queue.items.push_back(frame.clone());
        queue.bytes += frame.len();

        while queue.items.len() > self.max_items || queue.bytes > self.max_bytes {
            if let Some(dropped) = queue.items.pop_front() {
                queue.bytes = queue.bytes.saturating_sub(dropped.len());
                tracing::warn!("peer outbound queue full, dropped oldest frame");
            } else {
                break;
            }
        }
        self.update_watermark(&queue);
        drop(queue);
        self.not_empty.notify_one();
    }

    async fn recv(&self) -> Option<Bytes> {
        self.inbound_rx.lock().await.recv().await
    }

    fn state(&self) -> PeerState {
        *self.state.lock().unwrap()
    }

    fn buffer_level(&self) -> BufferLevel {
        if self.high_water.load(Ordering::Relaxed) {
            BufferLevel::High
        } else {
            BufferLevel::Low
        }
    }

    async fn close(&self) {
        *self.state.lock().unwrap() = PeerState::Closing;
        self.closed.store(true, Ordering::Relaxed);
        {
            let mut queue = self.queue.lock().await;
            queue.items.clear();
            queue.bytes = 0;
        }
        self.not_empty.notify_one();
        *self.state.lock().unwrap() = PeerState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn linked_pair_delivers_frames_in_order() {
        let (a, b) = InMemoryPeerTransport::pair(Duration::ZERO, 0.0);
        a.send(Bytes::from_static(b"one")).await;
        a.send(Bytes::from_static(b"two")).await;
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_frame() {
        let (a, b) = InMemoryPeerTransport::pair_with_caps(Duration::ZERO, 0.0, 2, 1024);
        a.send(Bytes::from_static(b"first")).await;
        a.send(Bytes::from_static(b"second")).await;
        a.send(Bytes::from_static(b"third")).await;
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"second"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"third"));
    }

    #[tokio::test]
    async fn close_drops_queue_and_ends_recv() {
        let (a, b) = InMemoryPeerTransport::pair(Duration::ZERO, 0.0);
        a.send(Bytes::from_static(b"queued")).await;
        a.close().await;
        assert_eq!(a.state(), PeerState::Closed);
        // The frame sent before close may or may not have drained already;
        // either way the channel eventually yields None once both ends drop.
        drop(a);
        drop(b);
    }
}
