//! Core hashtree types shared by every other crate in this workspace.
//!
//! ## Protocol types (wire-stable)
//!
//! The following are intended to be stable for the 1.0 protocol:
//!
//! - Content hashes (`hash::Hash`) and content identifiers (`cid::Cid`)
//! - The block codec (`block`) and the encryption layer (`crypto`)
//! - Pointer/registry records (`record::Record`, `record::RecordKey`)
//! - The `nhash`/`npath` text encodings
//!
//! ## Convenience APIs (non-wire)
//!
//! - `registry_api::RegistryApi` and `pins::{Pins, RegistryPinner}`
//! - `config::Config`
//! - `error::HashtreeError`

pub mod block;
pub mod cid;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod nhash;
pub mod npath;
pub mod pins;
pub mod record;
pub mod registry_api;

pub use block::{Block, ChunkEntry, DirEntry};
pub use cid::{Cid, LinkType};
pub use config::Config;
pub use error::{HashtreeError, Result};
pub use hash::Hash;
pub use pins::{PinContext, Pins, RegistryPinner};
pub use record::{Record, RecordKey, RecordKind};
pub use registry_api::RegistryApi;
