//! The encryption layer (C2): per-parent-branch convergent key derivation,
//! the three visibility modes, and the AEAD used to seal block bytes.
//!
//! A block's key is derived from its *plaintext* content so that identical
//! children of the same parent converge to the same ciphertext, while
//! identical subtrees under different parents diverge — this is what keeps
//! convergent encryption from leaking cross-tree content correlation.

use crate::error::{HashtreeError, Result};
use crate::hash::Hash;
use bytes::{Bytes, BytesMut};
use chacha20poly1305::{
    AeadCore, KeyInit, XChaCha20Poly1305, XNonce,
    aead::{Aead, OsRng},
};

/// Domain-separation string for the child key KDF. Versioned so a future
/// key-schedule change can introduce a new context without colliding.
const CHILD_KEY_CONTEXT: &str = "hashtree/v1/child-key";

/// Who can recover the root key of a published tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Root key travels in the clear in the pointer event.
    Public,
    /// Root key is encrypted to a link key not published with the event.
    Unlisted,
    /// Root key is published only self-encrypted to the signer.
    Private,
}

/// Derives a child's block key from its parent's key and its own plaintext
/// hash: `KDF(K_parent || child_plaintext_hash)`.
pub fn derive_child_key(parent_key: &[u8; 32], child_plaintext_hash: &Hash) -> [u8; 32] {
    let mut material = [0u8; 64];
    material[..32].copy_from_slice(parent_key);
    material[32..].copy_from_slice(child_plaintext_hash.as_bytes());
    blake3::derive_key(CHILD_KEY_CONTEXT, &material)
}

/// Generates a fresh random root key for a private or unlisted tree.
pub fn generate_root_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    // OsRng satisfies both the `rand_core` 0.6 and 0.9 `RngCore` traits that
    // `chacha20poly1305`'s re-exported `aead` crate expects here.
    use chacha20poly1305::aead::rand_core::RngCore;
    OsRng.fill_bytes(&mut key);
    key
}

/// Seals `plaintext` under `key`. The returned bytes are `nonce ‖
/// ciphertext ‖ tag`; the block hash is computed over exactly these bytes.
pub fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<Bytes> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| HashtreeError::Malformed("encryption failure".into()))?;
    let mut out = BytesMut::with_capacity(nonce.len() + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out.freeze())
}

/// Opens `sealed` (as produced by [`seal`]) under `key`.
pub fn open(sealed: &[u8], key: &[u8; 32], hash: Hash) -> Result<Bytes> {
    if sealed.len() < 24 {
        return Err(HashtreeError::Malformed("ciphertext too short".into()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(24);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| HashtreeError::DecryptionFailed(hash))?;
    Ok(Bytes::from(plaintext))
}

/// Computes the stored hash for a plaintext block under an optional key.
/// With `None`, the block is stored unencrypted and hashed directly
/// (public trees); with `Some`, the plaintext is sealed first and the hash
/// covers the ciphertext (invariant I1).
pub fn seal_and_hash(plaintext: &[u8], key: Option<&[u8; 32]>) -> Result<(Bytes, Hash)> {
    match key {
        None => Ok((Bytes::copy_from_slice(plaintext), Hash::new(plaintext))),
        Some(key) => {
            let sealed = seal(plaintext, key)?;
            let hash = Hash::new(&sealed);
            Ok((sealed, hash))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = generate_root_key();
        let plaintext = b"directory bytes";
        let sealed = seal(plaintext, &key).unwrap();
        let hash = Hash::new(&sealed);
        let opened = open(&sealed, &key, hash).unwrap();
        assert_eq!(&opened[..], plaintext);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let key = generate_root_key();
        let other = generate_root_key();
        let sealed = seal(b"data", &key).unwrap();
        let hash = Hash::new(&sealed);
        assert!(open(&sealed, &other, hash).is_err());
    }

    #[test]
    fn child_key_derivation_is_scoped_per_parent() {
        let parent_a = generate_root_key();
        let parent_b = generate_root_key();
        let child_hash = Hash::new(b"same plaintext under both parents");
        let key_under_a = derive_child_key(&parent_a, &child_hash);
        let key_under_b = derive_child_key(&parent_b, &child_hash);
        assert_ne!(key_under_a, key_under_b);
    }

    #[test]
    fn same_parent_same_plaintext_converges() {
        let parent = generate_root_key();
        let child_hash = Hash::new(b"repeated content");
        assert_eq!(
            derive_child_key(&parent, &child_hash),
            derive_child_key(&parent, &child_hash)
        );
    }
}
