//! Crate-wide configuration defaults.
//!
//! Every default lives here as a named constant next to the `Config` field
//! it governs, rather than as a magic number at the call site.

use serde::{Deserialize, Serialize};

/// Files at or below this size are stored inline as a single `blob` block.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 256 * 1024;
/// Fixed chunk size used once a file exceeds `chunk_threshold`.
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;
/// Coalescing window for the reference resolver's throttled publish.
pub const DEFAULT_PUBLISH_THROTTLE_MS: u64 = 3000;
/// Per-peer concurrent in-flight block request cap.
pub const DEFAULT_PEER_INFLIGHT_LIMIT: usize = 16;
/// Per-request timeout before a peer is treated as having failed it.
pub const DEFAULT_PEER_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Per-peer outbound queue item cap.
pub const DEFAULT_PEER_QUEUE_MAX_ITEMS: usize = 100;
/// Per-peer outbound queue byte cap.
pub const DEFAULT_PEER_QUEUE_MAX_BYTES: u64 = 8 * 1024 * 1024;
/// Connect timeout for a new peer session.
pub const DEFAULT_PEER_CONNECT_TIMEOUT_MS: u64 = 30_000;
/// Outbound channel buffered-amount threshold that pauses the send loop.
pub const DEFAULT_SEND_LOOP_THRESHOLD_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk_threshold: u64,
    pub chunk_size: u64,
    pub publish_throttle_ms: u64,
    pub peer_inflight_limit: usize,
    pub peer_request_timeout_ms: u64,
    pub peer_queue_max_items: usize,
    pub peer_queue_max_bytes: u64,
    pub peer_connect_timeout_ms: u64,
    pub send_loop_threshold_bytes: u64,
    /// Opportunistic GC runs once total stored bytes exceed this.
    pub gc_soft_cap_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            publish_throttle_ms: DEFAULT_PUBLISH_THROTTLE_MS,
            peer_inflight_limit: DEFAULT_PEER_INFLIGHT_LIMIT,
            peer_request_timeout_ms: DEFAULT_PEER_REQUEST_TIMEOUT_MS,
            peer_queue_max_items: DEFAULT_PEER_QUEUE_MAX_ITEMS,
            peer_queue_max_bytes: DEFAULT_PEER_QUEUE_MAX_BYTES,
            peer_connect_timeout_ms: DEFAULT_PEER_CONNECT_TIMEOUT_MS,
            send_loop_threshold_bytes: DEFAULT_SEND_LOOP_THRESHOLD_BYTES,
            // 1 GiB; intentionally generous, meant only to avoid unbounded growth
            // on long-running nodes rather than to bound memory tightly.
            gc_soft_cap_bytes: 1024 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.chunk_threshold, 256 * 1024);
        assert_eq!(config.publish_throttle_ms, 3000);
        assert_eq!(config.peer_inflight_limit, 16);
    }
}
