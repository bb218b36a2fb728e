//! Publisher error types

use contracts::{CodecError, TransportError};
use thiserror::Error;

/// Why a publish failed. Nothing was sent in either case.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload could not be encoded
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),

    /// The broker refused or could not be reached
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

impl PublishError {
    /// True for broker outages a caller may retry later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Unavailable { .. }))
    }
}
