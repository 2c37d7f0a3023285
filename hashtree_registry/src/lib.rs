//! The reference resolver (C5): maps `(signer, tree-name)` to a root CID
//! via signed, throttled pointer events, reconciling a local cache against
//! a pluggable pointer-event network.

pub mod event;
pub mod publisher;
pub mod resolver;
pub mod signer;

pub use event::{PointerEvent, ResolverError};
pub use publisher::{EventPublisher, EventSink, EventSubscription, SubscriptionId};
pub use resolver::{KeyRecovery, PublishOptions, Resolver, ResolverEntry};
pub use signer::{LocalSigner, Signer};
