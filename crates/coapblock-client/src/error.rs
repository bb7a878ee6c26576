//! Errors surfaced to callers of the client.

use coapblock_core::{BlockError, DestinationError, Response};

use crate::transport::TransportError;

/// Why a request or transfer did not succeed.
///
/// `Rejected` carries the full server response so the caller can inspect
/// the code and body. `NoBlocks` and `Block` are internal invariant
/// violations, not server decisions.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("request rejected with {}", .0.code)]
    Rejected(Response),

    #[error("no blocks left to send")]
    NoBlocks,

    #[error("block: {0}")]
    Block(#[from] BlockError),

    #[error("destination: {0}")]
    Destination(#[from] DestinationError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Transport(TransportError::Timeout))
    }

    /// The server response behind a rejection.
    pub fn response(&self) -> Option<&Response> {
        match self {
            ClientError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}
