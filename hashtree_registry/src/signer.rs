//! The identity abstraction the reference resolver signs pointer events
//! with. Kept abstract so the resolver never depends on a concrete key
//! store — a caller might back this with an in-memory keypair, an OS
//! keychain, or a remote signing service.

use async_trait::async_trait;

#[async_trait]
pub trait Signer: Send + Sync {
    fn public_key(&self) -> [u8; 32];

    /// A stable symmetric key derived from this identity's secret
    /// material, used only to self-encrypt root keys for private and
    /// unlisted trees so the owner can recover them without holding a
    /// separate link key.
    fn self_encryption_key(&self) -> [u8; 32];

    async fn sign(&self, message: &[u8]) -> anyhow::Result<[u8; 64]>;
}

/// An in-process ed25519 signer, for tests and single-process embedders.
pub struct LocalSigner {
    signing_key: ed25519_dalek::SigningKey,
}

impl LocalSigner {
    /// Builds a signer from a 32-byte seed. Keeping construction
    /// seed-based (rather than pulling in a fresh RNG dependency) lets
    /// callers generate the seed however their embedding already does —
    /// e.g. via `hashtree_core::crypto::generate_root_key`'s same
    /// `OsRng`-backed approach.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&seed),
        }
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn self_encryption_key(&self) -> [u8; 32] {
        blake3::derive_key(
            "hashtree/v1/self-encryption-key",
            self.signing_key.as_bytes(),
        )
    }

    async fn sign(&self, message: &[u8]) -> anyhow::Result<[u8; 64]> {
        use ed25519_dalek::Signer as _;
        Ok(self.signing_key.sign(message).to_bytes())
    }
}
