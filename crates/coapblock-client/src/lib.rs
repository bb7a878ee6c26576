//! coapblock-client — sends CoAP requests, splitting large uploads into
//! Block1 transfers that advance one confirmed block at a time.

pub mod breaker;
pub mod client;
pub mod error;
pub mod transfer;
pub mod transport;
pub mod udp;

#[cfg(test)]
pub(crate) mod testing;

pub use breaker::ConnectivityBreaker;
pub use client::{CoapClient, Payload};
pub use error::ClientError;
pub use transfer::BlockwiseTransfer;
pub use transport::{Transport, TransportError};
pub use udp::UdpTransport;
