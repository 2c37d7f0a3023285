//! The block-exchange protocol (C6) and peer transport abstraction (C7).
//!
//! C6 answers "who has block `h`" across a set of connected peers: a
//! requester fans a `REQUEST` out to peers round-robin until one answers
//! with `RESPONSE`, falling back on `NOT_FOUND`; a responder only ever
//! answers from its own local store (C3), never forwarding a miss on to
//! someone else — that asymmetry is what keeps the network loop-free.
//!
//! C7 is the abstract `PeerTransport` a concrete collaborator (WebRTC data
//! channels, in production) implements; this crate ships a deterministic
//! in-memory transport for the exchange engine's own test suite.

pub mod error;
pub mod frame;
pub mod peer;
pub mod session;
pub mod stats;
pub mod transport;

pub use error::ExchangeError;
pub use frame::Frame;
pub use peer::{FetchOutcome, PeerId};
pub use session::Exchange;
pub use stats::PeerStats;
pub use transport::{BufferLevel, InMemoryPeerTransport, PeerState, PeerTransport};
