//! CoAP wire format (RFC 7252 §3).
//!
//! ```text
//!  0                   1                   2                   3
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! |   Token (if any, TKL bytes) ...
//! |   Options (if any) ...
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! ```
//!
//! The 4-byte fixed header is a `#[repr(C, packed)]` zerocopy struct. Options
//! are delta-encoded and must be written in ascending option-number order; the
//! encoder sorts them so callers do not have to.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::code::Code;

// ── Fixed Header ─────────────────────────────────────────────────────────────

/// First four bytes of every CoAP message.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FixedHeader {
    /// bits 7-6: version (always 1)
    /// bits 5-4: message type
    /// bits 3-0: token length (0..=8)
    pub ver_type_tkl: u8,

    /// Request method or response code, see [`Code`].
    pub code: u8,

    /// Message ID in network byte order. Matches ACK/RST to CON.
    pub message_id: [u8; 2],
}

assert_eq_size!(FixedHeader, [u8; 4]);

// ── Constants ────────────────────────────────────────────────────────────────

pub const COAP_VERSION: u8 = 1;

/// Default UDP port for the `coap` scheme.
pub const DEFAULT_PORT: u16 = 5683;

pub const MAX_TOKEN_LEN: usize = 8;

pub const PAYLOAD_MARKER: u8 = 0xff;

/// Registered option numbers used by this client.
pub mod option {
    pub const URI_HOST: u16 = 3;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const BLOCK1: u16 = 27;
}

// ── Message Type ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Needs an ACK; retransmitted until one arrives.
    Confirmable = 0,
    /// Fire and forget.
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    /// Two-bit field, every value is defined.
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

// ── Content Format ───────────────────────────────────────────────────────────

/// Content-Format registry values (RFC 7252 §12.3) the client knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContentFormat {
    TextPlain = 0,
    LinkFormat = 40,
    Xml = 41,
    OctetStream = 42,
    Json = 50,
    Cbor = 60,
}

impl ContentFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ContentFormat::TextPlain => "text/plain",
            ContentFormat::LinkFormat => "application/link-format",
            ContentFormat::Xml => "application/xml",
            ContentFormat::OctetStream => "application/octet-stream",
            ContentFormat::Json => "application/json",
            ContentFormat::Cbor => "application/cbor",
        }
    }

    /// Short names accepted on the command line, plus the full MIME types.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "text" | "text/plain" => Some(ContentFormat::TextPlain),
            "link" | "application/link-format" => Some(ContentFormat::LinkFormat),
            "xml" | "application/xml" => Some(ContentFormat::Xml),
            "octet" | "binary" | "application/octet-stream" => Some(ContentFormat::OctetStream),
            "json" | "application/json" => Some(ContentFormat::Json),
            "cbor" | "application/cbor" => Some(ContentFormat::Cbor),
            _ => None,
        }
    }
}

impl TryFrom<u16> for ContentFormat {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ContentFormat::TextPlain),
            40 => Ok(ContentFormat::LinkFormat),
            41 => Ok(ContentFormat::Xml),
            42 => Ok(ContentFormat::OctetStream),
            50 => Ok(ContentFormat::Json),
            60 => Ok(ContentFormat::Cbor),
            other => Err(WireError::UnknownContentFormat(other)),
        }
    }
}

impl From<ContentFormat> for u16 {
    fn from(f: ContentFormat) -> u16 {
        f as u16
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOption {
    pub number: u16,
    pub value: Vec<u8>,
}

impl MessageOption {
    pub fn new(number: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }

    pub fn uint(number: u16, value: u32) -> Self {
        Self::new(number, encode_uint(value))
    }
}

/// A decoded CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<MessageOption>,
    pub payload: Bytes,
}

impl Message {
    /// Empty ACK, used to acknowledge a confirmable separate response.
    pub fn empty_ack(message_id: u16) -> Self {
        Self {
            kind: MessageType::Acknowledgement,
            code: Code::EMPTY,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// First option with the given number.
    pub fn option(&self, number: u16) -> Option<&MessageOption> {
        self.options.iter().find(|o| o.number == number)
    }

    /// Option value interpreted as a CoAP uint. `None` if absent or longer
    /// than four bytes.
    pub fn uint_option(&self, number: u16) -> Option<u32> {
        self.option(number).and_then(|o| decode_uint(&o.value))
    }

    /// All values of a repeatable option, in order.
    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(WireError::InvalidTokenLength(self.token.len()));
        }

        let header = FixedHeader {
            ver_type_tkl: (COAP_VERSION << 6) | ((self.kind as u8) << 4) | self.token.len() as u8,
            code: self.code.to_byte(),
            message_id: self.message_id.to_be_bytes(),
        };

        let mut out = Vec::with_capacity(4 + self.token.len() + 32 + self.payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.token);

        // Stable sort keeps repeated options (Uri-Path) in caller order.
        let mut options: Vec<&MessageOption> = self.options.iter().collect();
        options.sort_by_key(|o| o.number);

        let mut previous = 0u16;
        for opt in options {
            if opt.value.len() > MAX_OPTION_FIELD {
                return Err(WireError::OptionTooLong(opt.number, opt.value.len()));
            }
            let delta = (opt.number - previous) as usize;
            let len = opt.value.len();
            out.push((option_nibble(delta) << 4) | option_nibble(len));
            push_extended(&mut out, delta);
            push_extended(&mut out, len);
            out.extend_from_slice(&opt.value);
            previous = opt.number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }

        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = FixedHeader::read_from_prefix(buf).ok_or(WireError::Truncated)?;

        let version = header.ver_type_tkl >> 6;
        if version != COAP_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let kind = MessageType::from_bits(header.ver_type_tkl >> 4);
        let tkl = (header.ver_type_tkl & 0x0f) as usize;
        if tkl > MAX_TOKEN_LEN {
            return Err(WireError::InvalidTokenLength(tkl));
        }

        let mut pos = 4;
        let token = buf.get(pos..pos + tkl).ok_or(WireError::Truncated)?.to_vec();
        pos += tkl;

        let mut options = Vec::new();
        let mut payload = Bytes::new();
        let mut number = 0u32;

        while let Some(&byte) = buf.get(pos) {
            pos += 1;
            if byte == PAYLOAD_MARKER {
                if pos == buf.len() {
                    return Err(WireError::PayloadMarkerWithoutPayload);
                }
                payload = Bytes::copy_from_slice(&buf[pos..]);
                break;
            }

            let delta = read_extended(buf, &mut pos, byte >> 4)?;
            let len = read_extended(buf, &mut pos, byte & 0x0f)?;

            number += delta as u32;
            let option_number =
                u16::try_from(number).map_err(|_| WireError::OptionNumberOverflow(number))?;

            let value = buf.get(pos..pos + len).ok_or(WireError::Truncated)?;
            pos += len;
            options.push(MessageOption::new(option_number, value));
        }

        Ok(Message {
            kind,
            code: Code::from_byte(header.code),
            message_id: u16::from_be_bytes(header.message_id),
            token,
            options,
            payload,
        })
    }
}

// ── Option encoding helpers ──────────────────────────────────────────────────

/// Largest delta or length expressible with the 14 (two-byte) form.
const MAX_OPTION_FIELD: usize = 269 + u16::MAX as usize;

fn option_nibble(value: usize) -> u8 {
    match value {
        0..=12 => value as u8,
        13..=268 => 13,
        _ => 14,
    }
}

fn push_extended(out: &mut Vec<u8>, value: usize) {
    match value {
        0..=12 => {}
        13..=268 => out.push((value - 13) as u8),
        _ => out.extend_from_slice(&((value - 269) as u16).to_be_bytes()),
    }
}

fn read_extended(buf: &[u8], pos: &mut usize, nibble: u8) -> Result<usize, WireError> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => {
            let b = *buf.get(*pos).ok_or(WireError::Truncated)?;
            *pos += 1;
            Ok(b as usize + 13)
        }
        14 => {
            let b = buf.get(*pos..*pos + 2).ok_or(WireError::Truncated)?;
            *pos += 2;
            Ok(u16::from_be_bytes([b[0], b[1]]) as usize + 269)
        }
        _ => Err(WireError::ReservedOptionNibble),
    }
}

/// Minimal big-endian uint encoding. Zero encodes as the empty string.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

pub fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,

    #[error("unsupported CoAP version {0}")]
    UnsupportedVersion(u8),

    #[error("token length {0} exceeds maximum {}", MAX_TOKEN_LEN)]
    InvalidTokenLength(usize),

    #[error("reserved option delta/length nibble 15")]
    ReservedOptionNibble,

    #[error("option number {0} out of range")]
    OptionNumberOverflow(u32),

    #[error("option {0} value length {1} too long")]
    OptionTooLong(u16, usize),

    #[error("payload marker present but payload empty")]
    PayloadMarkerWithoutPayload,

    #[error("unknown content format {0}")]
    UnknownContentFormat(u16),
}

// ── Tests ────────────────────────────────────────────────────────────────────
