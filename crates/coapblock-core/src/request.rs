//! Request and response descriptors handed to and returned by a transport.

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;

use crate::block::{Block, BlockError, MAX_BLOCK_INDEX};
use crate::code::Code;
use crate::wire::{option, ContentFormat, Message, MessageOption, MessageType, WireError, MAX_TOKEN_LEN};

// ── Method ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for Code {
    fn from(m: Method) -> Code {
        match m {
            Method::Get => Code::GET,
            Method::Post => Code::POST,
            Method::Put => Code::PUT,
            Method::Delete => Code::DELETE,
        }
    }
}

// ── Destination ──────────────────────────────────────────────────────────────

/// Parsed `coap://host[:port]/path?query` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Hostname or IP literal, IPv6 without brackets.
    pub host: String,
    pub port: u16,
    pub path: Vec<String>,
    pub query: Vec<String>,
}

impl Destination {
    /// Parse a `coap://` URL. `default_port` applies when the URL has none.
    pub fn parse(url: &str, default_port: u16) -> Result<Self, DestinationError> {
        let rest = url
            .strip_prefix("coap://")
            .ok_or_else(|| DestinationError::UnsupportedScheme(url.to_string()))?;

        let (authority, path_and_query) = match rest.find(|c: char| c == '/' || c == '?') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let (host, after) = v6
                .split_once(']')
                .ok_or_else(|| DestinationError::MissingHost(url.to_string()))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(DestinationError::InvalidPort(after.to_string())),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(DestinationError::MissingHost(url.to_string()));
        }
        let port = match port {
            Some(p) => p
                .parse()
                .map_err(|_| DestinationError::InvalidPort(p.to_string()))?,
            None => default_port,
        };

        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path_and_query, ""),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path: segments(path, '/'),
            query: segments(query, '&'),
        })
    }

    /// Uri-Host is only sent for names; an IP literal is implied by the
    /// datagram's destination address.
    fn is_ip_literal(&self) -> bool {
        self.host.parse::<IpAddr>().is_ok()
    }
}

fn segments(s: &str, sep: char) -> Vec<String> {
    s.split(sep)
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
        .collect()
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "coap://[{}]:{}", self.host, self.port)?;
        } else {
            write!(f, "coap://{}:{}", self.host, self.port)?;
        }
        write!(f, "/{}", self.path.join("/"))?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query.join("&"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    #[error("unsupported URL scheme in {0:?}, expected coap://")]
    UnsupportedScheme(String),

    #[error("missing host in {0:?}")]
    MissingHost(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

// ── Request ──────────────────────────────────────────────────────────────────

/// Everything a transport needs to put one request on the wire. Message ID
/// and token are the transport's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub destination: Destination,
    pub method: Method,
    pub confirmable: bool,
    pub content_format: Option<ContentFormat>,
    pub accept: Option<ContentFormat>,
    /// Encoded Block1 option value, present only on block-wise requests.
    pub block1: Option<u32>,
    pub payload: Bytes,
}

impl Request {
    /// Confirmable request with no options and no payload.
    pub fn new(destination: Destination, method: Method) -> Self {
        Self {
            destination,
            method,
            confirmable: true,
            content_format: None,
            accept: None,
            block1: None,
            payload: Bytes::new(),
        }
    }

    pub fn confirmable(mut self, confirmable: bool) -> Self {
        self.confirmable = confirmable;
        self
    }

    pub fn content_format(mut self, format: ContentFormat) -> Self {
        self.content_format = Some(format);
        self
    }

    pub fn accept(mut self, format: ContentFormat) -> Self {
        self.accept = Some(format);
        self
    }

    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Copy of this request carrying one block: its Block1 value and its bytes.
    ///
    /// `block` must come from splitting `body`; the payload is a view into
    /// `body`'s buffer, not a copy.
    pub fn for_block(&self, block: &Block<'_>, body: &Bytes) -> Result<Self, BlockError> {
        let mut request = self.clone();
        request.block1 = Some(block.option_value()?);
        request.payload = body.slice_ref(block.data);
        Ok(request)
    }

    /// Encoded size of this request without its payload, assuming the
    /// longest token and a three-byte Block1 value, plus the payload marker.
    /// `max_packet_size` minus this is the room left for payload bytes.
    pub fn overhead(&self) -> Result<usize, WireError> {
        let mut bare = self.clone();
        bare.payload = Bytes::new();
        bare.block1 = Some((MAX_BLOCK_INDEX << 4) | 0x0f);
        let encoded = bare.to_message(0, vec![0; MAX_TOKEN_LEN]).encode()?;
        Ok(encoded.len() + 1)
    }

    pub fn to_message(&self, message_id: u16, token: Vec<u8>) -> Message {
        let mut options = Vec::new();
        if !self.destination.is_ip_literal() {
            options.push(MessageOption::new(
                option::URI_HOST,
                self.destination.host.as_bytes(),
            ));
        }
        for seg in &self.destination.path {
            options.push(MessageOption::new(option::URI_PATH, seg.as_bytes()));
        }
        if let Some(format) = self.content_format {
            options.push(MessageOption::uint(option::CONTENT_FORMAT, format as u32));
        }
        for q in &self.destination.query {
            options.push(MessageOption::new(option::URI_QUERY, q.as_bytes()));
        }
        if let Some(format) = self.accept {
            options.push(MessageOption::uint(option::ACCEPT, format as u32));
        }
        if let Some(block1) = self.block1 {
            options.push(MessageOption::uint(option::BLOCK1, block1));
        }

        Message {
            kind: if self.confirmable {
                MessageType::Confirmable
            } else {
                MessageType::NonConfirmable
            },
            code: self.method.into(),
            message_id,
            token,
            options,
            payload: self.payload.clone(),
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: Code,
    pub payload: Bytes,
    pub content_format: Option<u16>,
    /// Block1 value echoed by the server, if any.
    pub block1: Option<u32>,
}

impl Response {
    pub fn new(code: Code, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
            content_format: None,
            block1: None,
        }
    }

    pub fn from_message(msg: &Message) -> Self {
        Self {
            code: msg.code,
            payload: msg.payload.clone(),
            content_format: msg
                .uint_option(option::CONTENT_FORMAT)
                .and_then(|v| u16::try_from(v).ok()),
            block1: msg.uint_option(option::BLOCK1),
        }
    }

    /// Payload as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
