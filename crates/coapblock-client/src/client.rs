//! Request surface: GET/POST/PUT against `coap://` URLs.
//!
//! Uploads no larger than `max_single_payload` that also fit one datagram
//! alongside their options go out as one request. Anything larger becomes a
//! Block1 transfer, with the block size shrunk if the options leave less
//! than a full block of room.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use coapblock_core::config::{ClientConfig, ConfigError, TransportConfig};
use coapblock_core::{BlockSize, ContentFormat, Destination, Method, Request, Response};

use crate::error::ClientError;
use crate::transfer::BlockwiseTransfer;
use crate::transport::{Transport, TransportError};

/// Upload body: raw bytes, or a value already serialized as JSON.
#[derive(Debug, Clone)]
pub enum Payload {
    Raw(Bytes),
    Json(Bytes),
}

impl Payload {
    /// Serialize `value` as-is; field order follows its `Serialize` impl.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Payload::Json(Bytes::from(serde_json::to_vec(value)?)))
    }

    fn into_bytes(self) -> Bytes {
        match self {
            Payload::Raw(b) | Payload::Json(b) => b,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Raw(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Raw(Bytes::from(v))
    }
}

pub struct CoapClient<T> {
    transport: T,
    block_size: BlockSize,
    max_single_payload: usize,
    max_packet_size: usize,
    default_port: u16,
}

impl<T: Transport> CoapClient<T> {
    /// Uses the default `max_packet_size`; see [`CoapClient::max_packet_size`].
    pub fn new(transport: T, block_size: BlockSize, max_single_payload: usize, default_port: u16) -> Self {
        Self {
            transport,
            block_size,
            max_single_payload,
            max_packet_size: TransportConfig::default().max_packet_size,
            default_port,
        }
    }

    pub fn from_config(transport: T, config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            transport,
            config.transfer.block_size()?,
            config.transfer.max_single_payload,
            config.transport.port,
        )
        .max_packet_size(config.transport.max_packet_size))
    }

    /// Datagram budget. Payloads that would not fit alongside the request's
    /// options go block-wise, with blocks shrunk until they fit.
    pub fn max_packet_size(mut self, max: usize) -> Self {
        self.max_packet_size = max;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// POST `payload` to `url`, block-wise if it is too large for one request.
    pub async fn post(
        &self,
        url: &str,
        payload: Payload,
        format: ContentFormat,
        confirmable: bool,
    ) -> Result<Response, ClientError> {
        self.upload(Method::Post, url, payload, format, confirmable).await
    }

    /// PUT `payload` to `url`, block-wise if it is too large for one request.
    pub async fn put(
        &self,
        url: &str,
        payload: Payload,
        format: ContentFormat,
        confirmable: bool,
    ) -> Result<Response, ClientError> {
        self.upload(Method::Put, url, payload, format, confirmable).await
    }

    pub async fn post_json<P: Serialize + ?Sized>(
        &self,
        url: &str,
        value: &P,
        confirmable: bool,
    ) -> Result<Response, ClientError> {
        self.post(url, Payload::json(value)?, ContentFormat::Json, confirmable)
            .await
    }

    /// Confirmable GET with `Accept: application/json`.
    pub async fn get_json(&self, url: &str) -> Result<Response, ClientError> {
        let request = Request::new(self.destination(url)?, Method::Get).accept(ContentFormat::Json);
        self.send_single(request).await
    }

    /// `get_json`, then decode the body.
    pub async fn get_json_as<R: DeserializeOwned>(&self, url: &str) -> Result<R, ClientError> {
        let response = self.get_json(url).await?;
        Ok(serde_json::from_slice(&response.payload)?)
    }

    async fn upload(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        format: ContentFormat,
        confirmable: bool,
    ) -> Result<Response, ClientError> {
        let template = Request::new(self.destination(url)?, method)
            .confirmable(confirmable)
            .content_format(format);
        let body = payload.into_bytes();

        let overhead = template.overhead().map_err(TransportError::from)?;
        let room = self.max_packet_size.saturating_sub(overhead);

        if body.len() <= self.max_single_payload.min(room) {
            return self.send_single(template.payload(body)).await;
        }

        let block_size = self.block_size.clamp_to(room).ok_or(TransportError::TooLarge {
            size: overhead + BlockSize::B16.bytes(),
            max: self.max_packet_size,
        })?;
        if block_size != self.block_size {
            tracing::debug!(
                configured = self.block_size.bytes(),
                block_size = block_size.bytes(),
                overhead,
                "shrinking block size to fit the datagram"
            );
        }

        BlockwiseTransfer::new(&self.transport, template, body, block_size)
            .run()
            .await
    }

    /// One request, no Block1. Any 2.xx is success.
    async fn send_single(&self, request: Request) -> Result<Response, ClientError> {
        let response = self.transport.send(request).await?;
        if response.code.is_success() {
            Ok(response)
        } else {
            tracing::debug!(code = %response.code, "request rejected");
            Err(ClientError::Rejected(response))
        }
    }

    fn destination(&self, url: &str) -> Result<Destination, ClientError> {
        Ok(Destination::parse(url, self.default_port)?)
    }
}
