//! Pointer events: the signed `{signer, tree-name, root-hash,
//! visibility-tags, timestamp}` tuple published by the reference resolver,
//! and their mapping onto a `hashtree_core::Record`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hashtree_core::crypto::Visibility;
use hashtree_core::{Hash, Record, RecordKey, RecordKind};

/// Recognized failure modes; none of these are fatal to the resolver —
/// callers log and skip the offending event.
#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    #[error("malformed pointer event: {0}")]
    InvalidEvent(String),
    #[error("pointer event signature did not verify")]
    SignatureMismatch,
    #[error("pointer event carries no recognizable visibility tags")]
    UnknownVisibility,
    #[error("self-encrypted root key did not authenticate")]
    DecryptionFailed,
    #[error(transparent)]
    Record(#[from] hashtree_core::record::RecordError),
}

/// A signed pointer event, carrying the root CID (absent for a tombstone)
/// and whichever visibility tags apply to the tree's publish mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerEvent {
    pub signer_pubkey: [u8; 32],
    pub tree_name: Bytes,
    /// Root content hash; `None` marks a tombstone (tree deleted).
    pub hash: Option<Hash>,
    /// Root key in the clear — public visibility only.
    pub key: Option<[u8; 32]>,
    /// Root key encrypted to a link key — unlisted visibility only.
    pub encrypted_key: Option<Bytes>,
    /// `H(link-key)`, lets holders recognize the event without decrypting.
    pub key_id: Option<Hash>,
    /// Root key encrypted to the signer's own self-encryption key.
    pub self_encrypted_key: Option<Bytes>,
    pub timestamp: u64,
    pub signature: [u8; 64],
}

impl PointerEvent {
    /// Bytes signed by the identity: every field except the signature
    /// itself, in a fixed order.
    pub(crate) fn signing_bytes(&self) -> Bytes {
        encode_fields(
            &self.signer_pubkey,
            &self.tree_name,
            self.hash,
            self.key,
            self.encrypted_key.as_deref(),
            self.key_id,
            self.self_encrypted_key.as_deref(),
            self.timestamp,
        )
    }

    /// Which visibility this event's tags imply, per the visibility
    /// recovery rules.
    pub fn visibility(&self) -> Option<Visibility> {
        if self.key.is_some() {
            Some(Visibility::Public)
        } else if self.encrypted_key.is_some() && self.key_id.is_some() {
            Some(Visibility::Unlisted)
        } else if self.self_encrypted_key.is_some() {
            Some(Visibility::Private)
        } else {
            None
        }
    }

    /// Maps this event onto the generic replaceable-record wire format
    /// used by the local cache ([`hashtree_core::RegistryApi`]).
    pub fn into_record(self) -> Result<Record, ResolverError> {
        let signature = Box::from(self.signature.as_slice());
        let payload = encode_fields(
            &self.signer_pubkey,
            &self.tree_name,
            self.hash,
            self.key,
            self.encrypted_key.as_deref(),
            self.key_id,
            self.self_encrypted_key.as_deref(),
            self.timestamp,
        );
        Ok(Record::new(
            RecordKind::Registry,
            RecordKey::PublicKeyEd25519(self.signer_pubkey),
            self.timestamp,
            self.hash.unwrap_or(Hash::EMPTY),
            signature,
            Some(payload),
        )?)
    }

    /// Recovers a [`PointerEvent`] from a cached or received record.
    pub fn from_record(record: &Record) -> Result<Self, ResolverError> {
        let RecordKey::PublicKeyEd25519(signer_pubkey) = record.key else {
            return Err(ResolverError::InvalidEvent(
                "pointer events are keyed by an ed25519 public key".into(),
            ));
        };
        let data = record
            .data
            .as_ref()
            .ok_or_else(|| ResolverError::InvalidEvent("missing pointer event payload".into()))?;
        let fields = decode_fields(data.clone())
            .map_err(|e| ResolverError::InvalidEvent(format!("{e}")))?;

        let sig_len = record.signature.len();
        if sig_len != 64 {
            return Err(ResolverError::InvalidEvent(format!(
                "expected a 64-byte signature, got {sig_len}"
            )));
        }
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&record.signature);

        let hash = if record.hash == Hash::EMPTY {
            None
        } else {
            Some(record.hash)
        };

        Ok(Self {
            signer_pubkey,
            tree_name: fields.tree_name,
            hash,
            key: fields.key,
            encrypted_key: fields.encrypted_key,
            key_id: fields.key_id,
            self_encrypted_key: fields.self_encrypted_key,
            timestamp: record.revision,
            signature,
        })
    }

    pub fn verify_signature(&self) -> Result<(), ResolverError> {
        let public_key = ed25519_dalek::VerifyingKey::from_bytes(&self.signer_pubkey)
            .map_err(|_| ResolverError::InvalidEvent("invalid ed25519 public key".into()))?;
        let signature = ed25519_dalek::Signature::from_bytes(&self.signature);
        use ed25519_dalek::Verifier;
        public_key
            .verify(&self.signing_bytes(), &signature)
            .map_err(|_| ResolverError::SignatureMismatch)
    }
}

struct DecodedFields {
    tree_name: Bytes,
    key: Option<[u8; 32]>,
    encrypted_key: Option<Bytes>,
    key_id: Option<Hash>,
    self_encrypted_key: Option<Bytes>,
}

#[allow(clippy::too_many_arguments)]
fn encode_fields(
    signer_pubkey: &[u8; 32],
    tree_name: &[u8],
    hash: Option<Hash>,
    key: Option<[u8; 32]>,
    encrypted_key: Option<&[u8]>,
    key_id: Option<Hash>,
    self_encrypted_key: Option<&[u8]>,
    timestamp: u64,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_slice(signer_pubkey);
    buf.put_u16(tree_name.len() as u16);
    buf.put_slice(tree_name);

    buf.put_u8(hash.is_some() as u8);
    if let Some(hash) = hash {
        buf.put_slice(hash.as_ref());
    }

    buf.put_u8(key.is_some() as u8);
    if let Some(key) = key {
        buf.put_slice(&key);
    }

    buf.put_u8(encrypted_key.is_some() as u8);
    if let Some(bytes) = encrypted_key {
        buf.put_u16(bytes.len() as u16);
        buf.put_slice(bytes);
    }

    buf.put_u8(key_id.is_some() as u8);
    if let Some(key_id) = key_id {
        buf.put_slice(key_id.as_ref());
    }

    buf.put_u8(self_encrypted_key.is_some() as u8);
    if let Some(bytes) = self_encrypted_key {
        buf.put_u16(bytes.len() as u16);
        buf.put_slice(bytes);
    }

    buf.put_u64(timestamp);
    buf.freeze()
}

fn decode_fields(mut bytes: Bytes) -> Result<DecodedFields, &'static str> {
    if bytes.remaining() < 32 + 2 {
        return Err("truncated pointer event payload");
    }
    bytes.advance(32); // signer_pubkey lives on the Record key, skip here
    let tree_name_len = bytes.get_u16() as usize;
    if bytes.remaining() < tree_name_len {
        return Err("truncated tree name");
    }
    let tree_name = bytes.copy_to_bytes(tree_name_len);

    if bytes.remaining() < 1 {
        return Err("truncated hash flag");
    }
    let has_hash = bytes.get_u8() != 0;
    if has_hash {
        if bytes.remaining() < 32 {
            return Err("truncated hash");
        }
        bytes.advance(32); // hash also lives on Record.hash, skip here
    }

    if bytes.remaining() < 1 {
        return Err("truncated key flag");
    }
    let key = if bytes.get_u8() != 0 {
        if bytes.remaining() < 32 {
            return Err("truncated key");
        }
        let mut k = [0u8; 32];
        bytes.copy_to_slice(&mut k);
        Some(k)
    } else {
        None
    };

    if bytes.remaining() < 1 {
        return Err("truncated encrypted_key flag");
    }
    let encrypted_key = if bytes.get_u8() != 0 {
        if bytes.remaining() < 2 {
            return Err("truncated encrypted_key length");
        }
        let len = bytes.get_u16() as usize;
        if bytes.remaining() < len {
            return Err("truncated encrypted_key");
        }
        Some(bytes.copy_to_bytes(len))
    } else {
        None
    };

    if bytes.remaining() < 1 {
        return Err("truncated key_id flag");
    }
    let key_id = if bytes.get_u8() != 0 {
        if bytes.remaining() < 32 {
            return Err("truncated key_id");
        }
        let mut h = [0u8; 32];
        bytes.copy_to_slice(&mut h);
        Some(Hash::from(h))
    } else {
        None
    };

    if bytes.remaining() < 1 {
        return Err("truncated self_encrypted_key flag");
    }
    let self_encrypted_key = if bytes.get_u8() != 0 {
        if bytes.remaining() < 2 {
            return Err("truncated self_encrypted_key length");
        }
        let len = bytes.get_u16() as usize;
        if bytes.remaining() < len {
            return Err("truncated self_encrypted_key");
        }
        Some(bytes.copy_to_bytes(len))
    } else {
        None
    };

    Ok(DecodedFields {
        tree_name,
        key,
        encrypted_key,
        key_id,
        self_encrypted_key,
    })
}
