//! Per-peer and aggregate traffic accounting: counters only, no locking,
//! so hot-path frame handling never contends on them.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PeerStats {
    pub requests_sent: AtomicU64,
    pub requests_received: AtomicU64,
    pub responses_sent: AtomicU64,
    pub responses_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

/// A point-in-time copy of [`PeerStats`]' counters, for callers that want
/// a stable snapshot rather than a handle to the live atomics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStatsSnapshot {
    pub requests_sent: u64,
    pub requests_received: u64,
    pub responses_sent: u64,
    pub responses_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl PeerStats {
    pub fn snapshot(&self) -> PeerStatsSnapshot {
        PeerStatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    pub fn record_request_sent(&self, wire_len: usize) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    pub fn record_request_received(&self, wire_len: usize) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    pub fn record_response_sent(&self, wire_len: usize) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    pub fn record_response_received(&self, wire_len: usize) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    /// A frame that isn't a request/response payload (`NotFound`, `Cancel`)
    /// still moves bytes over the wire and should count toward the totals.
    pub fn record_other_sent(&self, wire_len: usize) {
        self.bytes_sent.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    pub fn record_other_received(&self, wire_len: usize) {
        self.bytes_received.fetch_add(wire_len as u64, Ordering::Relaxed);
    }
}
