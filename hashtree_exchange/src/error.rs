//! `ExchangeError`: the narrower error type for transport/session-reset
//! conditions that don't belong in the tree/store domain's `HashtreeError`.

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("block or peer unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("peer session reset: {0}")]
    SessionReset(String),
}

impl From<ExchangeError> for hashtree_core::HashtreeError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Unavailable(msg) => hashtree_core::HashtreeError::Unavailable(msg),
            ExchangeError::Cancelled => hashtree_core::HashtreeError::Cancelled,
            ExchangeError::Malformed(msg) => hashtree_core::HashtreeError::ProtocolViolation(msg),
            ExchangeError::SessionReset(msg) => {
                hashtree_core::HashtreeError::ProtocolViolation(msg)
            }
        }
    }
}
