//! Content identifiers: a hash plus an optional symmetric decryption key.

use crate::Hash;
use std::fmt;

/// A pair `(hash, key?)`. `key` never participates in the hash; it is
/// transport metadata that rides along a reference to a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid {
    pub hash: Hash,
    pub key: Option<[u8; 32]>,
}

impl Cid {
    pub fn plain(hash: Hash) -> Self {
        Self { hash, key: None }
    }

    pub fn encrypted(hash: Hash, key: [u8; 32]) -> Self {
        Self {
            hash,
            key: Some(key),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cid")
            .field("hash", &self.hash)
            .field("key", &self.key.map(|_| "<redacted>"))
            .finish()
    }
}

/// The kind of thing a directory entry's CID refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    Dir,
    Blob,
}

impl LinkType {
    pub fn tag(self) -> u8 {
        match self {
            LinkType::Dir => 0,
            LinkType::Blob => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(LinkType::Dir),
            1 => Some(LinkType::Blob),
            _ => None,
        }
    }
}
