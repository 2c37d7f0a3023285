//! The crate-wide error kind enum.
//!
//! Every fallible operation in `hashtree_core`, `hashtree_store`, `hashtree_fs`
//! and `hashtree_registry` returns a `Result<T, HashtreeError>` (or an alias of
//! it) so callers can match on kind rather than parse a message string.

use crate::Hash;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HashtreeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed block: {0}")]
    Malformed(String),

    #[error("not a directory")]
    NotADirectory,

    #[error("duplicate entry name")]
    DuplicateName,

    #[error("key missing for referenced block {0}")]
    KeyMissing(Hash),

    #[error("decryption failed for block {0}")]
    DecryptionFailed(Hash),

    #[error("storage full")]
    StorageFull,

    #[error("block or peer unavailable: {0}")]
    Unavailable(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid pointer event: {0}")]
    InvalidEvent(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, HashtreeError>;
