//! coapblock-core — wire format, block splitting and request types.
//! Everything here is pure; sockets and timers live in coapblock-client.

pub mod block;
pub mod code;
pub mod config;
pub mod request;
pub mod wire;

pub use block::{split, Block, BlockError, BlockOption, BlockSize};
pub use code::Code;
pub use request::{Destination, DestinationError, Method, Request, Response};
pub use wire::{ContentFormat, Message, MessageType, WireError};
