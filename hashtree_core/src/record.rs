//! The generic replaceable record type used for pointer events and for
//! local pin-set bookkeeping.
//!
//! A `Record` is a signed `(key, revision, hash, data?)` tuple. For a
//! `Stream` record every revision is retained (an append-only log); for a
//! `Registry` record, only the revision that wins [`Record::should_store`]
//! is kept, which is exactly the reconciliation rule the reference
//! resolver (C5) needs for pointer events: higher revision (timestamp)
//! wins, and on a tie the lexicographically smaller hash wins.

use crate::Hash;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

/// Inline data above this size must be fetched out of band by hash instead.
pub const MAX_INLINE_DATA_SIZE: usize = 1024;

pub const KEY_SIZE: usize = 32;
pub const HASH_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

pub type PublicKeyEd25519 = [u8; KEY_SIZE];

/// Identifies the owner or topic of a record.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug, PartialOrd, Ord)]
#[non_exhaustive]
pub enum RecordKey {
    /// A local, unsigned identifier for ephemeral or process-local use.
    Local([u8; KEY_SIZE]),
    /// An Ed25519 public key; records under this key must be signed.
    PublicKeyEd25519(PublicKeyEd25519),
    /// A BLAKE3 hash, used to key the local pinned-set record for a block.
    Blake3HashPin([u8; KEY_SIZE]),
}

/// Whether a record is part of an append-only log or a replaceable entry.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum RecordKind {
    Stream = 0,
    Registry = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    pub key: RecordKey,
    /// For pointer events this is the unix-second timestamp; for streams a
    /// timestamp/sequence composite. A `u64` covers both uses.
    pub revision: u64,
    /// Content hash of `data` (or of the referent it stands for).
    pub hash: Hash,
    /// Ed25519 signature, empty for `RecordKey::Local`.
    pub signature: Box<[u8]>,
    /// Inline payload, present when small enough to gossip directly.
    pub data: Option<Bytes>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordError {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] RecordKeyError),
    #[error("invalid record kind: {0}")]
    InvalidKind(#[from] RecordKindError),
    #[error("signature required for public key")]
    SignatureRequired,
    #[error("invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength { expected: usize, actual: usize },
    #[error("inline data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },
    #[error("insufficient bytes for deserialization")]
    InsufficientBytes,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordKeyError {
    #[error("invalid data length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unknown record key type: {0}")]
    UnknownId(u8),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid record kind: {0}")]
pub struct RecordKindError(pub u8);

impl RecordKey {
    const LOCAL_ID: u8 = 0;
    const PUBLIC_KEY_ED25519_ID: u8 = 1;
    const BLAKE3_HASH_PIN_ID: u8 = 3;

    pub fn to_bytes(&self) -> (u8, &[u8]) {
        match self {
            RecordKey::Local(data) => (Self::LOCAL_ID, data),
            RecordKey::PublicKeyEd25519(data) => (Self::PUBLIC_KEY_ED25519_ID, data),
            RecordKey::Blake3HashPin(data) => (Self::BLAKE3_HASH_PIN_ID, data),
        }
    }

    pub fn from_bytes(id: u8, data: &[u8]) -> Result<Self, RecordKeyError> {
        let data_array: [u8; KEY_SIZE] =
            data.try_into()
                .map_err(|_| RecordKeyError::InvalidLength {
                    expected: KEY_SIZE,
                    actual: data.len(),
                })?;
        match id {
            Self::LOCAL_ID => Ok(RecordKey::Local(data_array)),
            Self::PUBLIC_KEY_ED25519_ID => Ok(RecordKey::PublicKeyEd25519(data_array)),
            Self::BLAKE3_HASH_PIN_ID => Ok(RecordKey::Blake3HashPin(data_array)),
            _ => Err(RecordKeyError::UnknownId(id)),
        }
    }

    pub fn requires_signature(&self) -> bool {
        self.signature_len() > 0
    }

    pub fn signature_len(&self) -> usize {
        match self {
            Self::Local(_) | Self::Blake3HashPin(_) => 0,
            Self::PublicKeyEd25519(_) => SIGNATURE_SIZE,
        }
    }

    pub fn enforce_inline_limit(&self) -> bool {
        !matches!(self, RecordKey::Blake3HashPin(_))
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = RecordKindError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RecordKind::Stream),
            1 => Ok(RecordKind::Registry),
            other => Err(RecordKindError(other)),
        }
    }
}

impl Record {
    pub fn new(
        kind: RecordKind,
        key: RecordKey,
        revision: u64,
        hash: Hash,
        signature: Box<[u8]>,
        data: Option<Bytes>,
    ) -> Result<Self, RecordError> {
        if key.requires_signature() && signature.is_empty() {
            return Err(RecordError::SignatureRequired);
        }
        let expected = key.signature_len();
        if signature.len() != expected {
            return Err(RecordError::InvalidSignatureLength {
                expected,
                actual: signature.len(),
            });
        }
        if key.enforce_inline_limit()
            && let Some(ref d) = data
            && d.len() > MAX_INLINE_DATA_SIZE
        {
            return Err(RecordError::DataTooLarge {
                size: d.len(),
                max: MAX_INLINE_DATA_SIZE,
            });
        }
        Ok(Self {
            kind,
            key,
            revision,
            hash,
            signature,
            data,
        })
    }

    /// Wire format: `kind:u8 ‖ keyType:u8 ‖ key:32 ‖ revision:u64(be) ‖
    /// hash:32 ‖ signature ‖ data?` (data consumes the remaining bytes).
    pub fn serialize(&self) -> Bytes {
        let (key_id, key_bytes) = self.key.to_bytes();
        let mut buf = BytesMut::with_capacity(
            1 + 1
                + KEY_SIZE
                + 8
                + HASH_SIZE
                + self.signature.len()
                + self.data.as_ref().map_or(0, |d| d.len()),
        );
        buf.put_u8(self.kind as u8);
        buf.put_u8(key_id);
        buf.put_slice(key_bytes);
        buf.put_u64(self.revision);
        buf.put_slice(self.hash.as_ref());
        buf.put_slice(&self.signature);
        if let Some(ref data) = self.data {
            buf.put_slice(data);
        }
        buf.freeze()
    }

    pub fn deserialize(mut bytes: Bytes) -> Result<Self, RecordError> {
        if bytes.remaining() < 1 + 1 + KEY_SIZE + 8 + HASH_SIZE {
            return Err(RecordError::InsufficientBytes);
        }
        let kind = RecordKind::try_from(bytes.get_u8())?;
        let key_id = bytes.get_u8();
        let mut key_bytes = [0u8; KEY_SIZE];
        bytes.copy_to_slice(&mut key_bytes);
        let key = RecordKey::from_bytes(key_id, &key_bytes)?;
        let revision = bytes.get_u64();
        let mut hash_bytes = [0u8; HASH_SIZE];
        bytes.copy_to_slice(&mut hash_bytes);
        let hash = Hash::from(hash_bytes);
        let sig_len = key.signature_len();
        if bytes.remaining() < sig_len {
            return Err(RecordError::InsufficientBytes);
        }
        let signature = if sig_len > 0 {
            let mut sig = vec![0u8; sig_len];
            bytes.copy_to_slice(&mut sig);
            sig.into_boxed_slice()
        } else {
            Box::new([])
        };
        let data = if !bytes.is_empty() {
            Some(bytes.copy_to_bytes(bytes.remaining()))
        } else {
            None
        };
        Self::new(kind, key, revision, hash, signature, data)
    }

    /// Whether this record should replace `existing`. Streams always store;
    /// registry (replaceable) records only store if they win [`Record::cmp`].
    pub fn should_store(&self, existing: Option<&Self>) -> bool {
        match self.kind {
            RecordKind::Stream => true,
            RecordKind::Registry => existing.is_none_or(|e| self > e),
        }
    }
}

impl Ord for Record {
    /// Higher revision wins; on a tie, the lexicographically smaller hash
    /// wins (so the comparison is reversed to make it the greater value).
    fn cmp(&self, other: &Self) -> Ordering {
        self.revision
            .cmp(&other.revision)
            .then_with(|| other.hash.cmp(&self.hash))
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(revision: u64, hash_byte: u8) -> Record {
        Record {
            kind: RecordKind::Registry,
            key: RecordKey::Local([0; KEY_SIZE]),
            revision,
            hash: [hash_byte; HASH_SIZE].into(),
            signature: Box::new([]),
            data: None,
        }
    }

    #[test]
    fn higher_revision_wins() {
        assert!(msg(2, 1) > msg(1, 1));
    }

    #[test]
    fn equal_revision_smaller_hash_wins() {
        assert!(msg(5, 1) > msg(5, 2));
    }

    #[test]
    fn should_store_reflects_ordering() {
        let older = msg(10, 1);
        let newer = msg(11, 1);
        assert!(older.should_store(None));
        assert!(!older.should_store(Some(&newer)));
        assert!(newer.should_store(Some(&older)));
    }

    #[test]
    fn stream_records_always_store() {
        let mut a = msg(1, 1);
        a.kind = RecordKind::Stream;
        let b = msg(2, 1);
        assert!(a.should_store(Some(&b)));
    }

    #[test]
    fn serialize_round_trips() {
        let original = Record::new(
            RecordKind::Registry,
            RecordKey::PublicKeyEd25519([42; KEY_SIZE]),
            0xDEAD_BEEF,
            [0xAB; HASH_SIZE].into(),
            Box::new([0xFF; SIGNATURE_SIZE]),
            Some(Bytes::from_static(b"\x01\x02\x03\x04")),
        )
        .unwrap();
        let deserialized = Record::deserialize(original.serialize()).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn revision_is_big_endian_on_wire() {
        let record = Record::new(
            RecordKind::Stream,
            RecordKey::Local([0; KEY_SIZE]),
            0x0102_0304_0506_0708,
            [0x11; KEY_SIZE].into(),
            Box::new([]),
            None,
        )
        .unwrap();
        let bytes = record.serialize();
        assert_eq!(&bytes[34..42], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
