//! CoAP message codes — `class.detail`, packed into one byte on the wire.
//!
//! The upper 3 bits are the class (0 = request, 2 = success, 4 = client
//! error, 5 = server error), the lower 5 bits the detail. Codes are shown
//! the way the RFC writes them: `2.31`, `4.13`.

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(u8);

impl Code {
    // ── Empty / requests ─────────────────────────────────────────────────────
    pub const EMPTY: Code = Code::new(0, 0);
    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    // ── Success ──────────────────────────────────────────────────────────────
    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);
    /// Intermediate Block1 block accepted, send the next one.
    pub const CONTINUE: Code = Code::new(2, 31);

    // ── Client errors ────────────────────────────────────────────────────────
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code::new(4, 8);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);
    pub const UNSUPPORTED_CONTENT_FORMAT: Code = Code::new(4, 15);

    // ── Server errors ────────────────────────────────────────────────────────
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);

    /// Build a code from class (0..=7) and detail (0..=31). Out-of-range bits
    /// are masked off.
    pub const fn new(class: u8, detail: u8) -> Self {
        Code(((class & 0x07) << 5) | (detail & 0x1f))
    }

    pub const fn from_byte(byte: u8) -> Self {
        Code(byte)
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_empty(self) -> bool {
        self == Code::EMPTY
    }

    pub fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    pub fn is_response(self) -> bool {
        self.class() >= 2
    }

    /// Any `2.xx` code.
    pub fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CoAP code {0:?}, expected class.detail like \"2.04\"")]
pub struct ParseCodeError(pub String);

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCodeError(s.to_string());
        let (class, detail) = s.split_once('.').ok_or_else(err)?;
        let class: u8 = class.parse().map_err(|_| err())?;
        let detail: u8 = detail.parse().map_err(|_| err())?;
        if class > 7 || detail > 31 {
            return Err(err());
        }
        Ok(Code::new(class, detail))
    }
}
