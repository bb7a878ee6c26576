//! The send primitive every request goes through.
//!
//! A transport takes one fully described request and resolves to exactly
//! one of: a response, a timeout, or a transport error. Retransmission and
//! message-layer details stay behind this boundary.

use std::future::Future;
use std::sync::Arc;

use coapblock_core::{Request, Response, WireError};

pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> + Send {
        (**self).send(request)
    }
}

impl<T: Transport> Transport for &T {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> + Send {
        (**self).send(request)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no response before the exchange timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("exchange reset by peer")]
    Reset,

    #[error("wire: {0}")]
    Wire(#[from] WireError),

    #[error("encoded request is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

impl TransportError {
    /// Failures that say the peer is unreachable rather than that the
    /// request itself was bad. These feed the connectivity breaker.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Io(_) | TransportError::Resolve(_)
        )
    }
}
