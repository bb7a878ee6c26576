//! Block-wise transfer primitives (RFC 7959) — block sizes, the Block1
//! continuation option, and the payload splitter.
//!
//! A Block1 option value packs three fields into one CoAP uint:
//!
//! ```text
//!   NUM (block index) << 4 | M (more blocks follow) << 3 | SZX
//! ```
//!
//! SZX is the size exponent, `log2(block size) - 4`. For the first sixteen
//! blocks the value fits in a single byte.

/// Highest block index a Block1 option can carry (20 bits).
pub const MAX_BLOCK_INDEX: u32 = 0x000f_ffff;

const MORE_FLAG: u32 = 0x08;

// ── Block Size ───────────────────────────────────────────────────────────────

/// One of the seven block sizes CoAP can express. The size and its exponent
/// are derived from the same variant, so they cannot drift apart.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BlockSize {
    B16 = 0,
    B32 = 1,
    B64 = 2,
    B128 = 3,
    B256 = 4,
    B512 = 5,
    #[default]
    B1024 = 6,
}

impl BlockSize {
    /// Size exponent (SZX).
    pub fn szx(self) -> u8 {
        self as u8
    }

    pub fn bytes(self) -> usize {
        1 << (self.szx() + 4)
    }

    pub fn from_szx(szx: u8) -> Option<Self> {
        match szx {
            0 => Some(BlockSize::B16),
            1 => Some(BlockSize::B32),
            2 => Some(BlockSize::B64),
            3 => Some(BlockSize::B128),
            4 => Some(BlockSize::B256),
            5 => Some(BlockSize::B512),
            6 => Some(BlockSize::B1024),
            _ => None,
        }
    }

    /// Exact byte count; anything but a power of two in 16..=1024 is `None`.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        if !bytes.is_power_of_two() || !(16..=1024).contains(&bytes) {
            return None;
        }
        Self::from_szx(bytes.trailing_zeros() as u8 - 4)
    }

    /// Largest size no bigger than `self` whose blocks fit in `room` bytes.
    pub fn clamp_to(self, room: usize) -> Option<Self> {
        (0..=self.szx())
            .rev()
            .filter_map(Self::from_szx)
            .find(|size| size.bytes() <= room)
    }
}

// ── Block Option ─────────────────────────────────────────────────────────────

/// Decoded Block1/Block2 option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub index: u32,
    pub more: bool,
    pub size: BlockSize,
}

impl BlockOption {
    pub fn encode(&self) -> Result<u32, BlockError> {
        if self.index > MAX_BLOCK_INDEX {
            return Err(BlockError::IndexOverflow(self.index));
        }
        let more = if self.more { MORE_FLAG } else { 0 };
        Ok((self.index << 4) | more | self.size.szx() as u32)
    }

    pub fn decode(value: u32) -> Result<Self, BlockError> {
        let szx = (value & 0x07) as u8;
        let size = BlockSize::from_szx(szx).ok_or(BlockError::ReservedSize)?;
        let index = value >> 4;
        if index > MAX_BLOCK_INDEX {
            return Err(BlockError::IndexOverflow(index));
        }
        Ok(Self {
            index,
            more: value & MORE_FLAG != 0,
            size,
        })
    }
}

// ── Block ────────────────────────────────────────────────────────────────────

/// One slice of an outgoing payload. Borrows the payload; never copies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    pub index: u32,
    pub more: bool,
    pub size: BlockSize,
    pub data: &'a [u8],
}

impl Block<'_> {
    pub fn option(&self) -> BlockOption {
        BlockOption {
            index: self.index,
            more: self.more,
            size: self.size,
        }
    }

    /// Block1 option value for this block.
    pub fn option_value(&self) -> Result<u32, BlockError> {
        self.option().encode()
    }
}

/// Split `payload` into blocks of `size`.
///
/// Every block but the last is exactly `size.bytes()` long and has `more`
/// set. The last block holds the remainder, which is a full block when the
/// payload is an exact multiple of the size; no empty trailing block is ever
/// produced. The result is never empty: an empty payload yields one empty
/// final block.
pub fn split(payload: &[u8], size: BlockSize) -> Vec<Block<'_>> {
    let block_len = size.bytes();
    let mut blocks = Vec::with_capacity(payload.len() / block_len + 1);
    let mut rest = payload;
    let mut index = 0u32;

    while rest.len() > block_len {
        let (head, tail) = rest.split_at(block_len);
        blocks.push(Block {
            index,
            more: true,
            size,
            data: head,
        });
        rest = tail;
        index += 1;
    }

    blocks.push(Block {
        index,
        more: false,
        size,
        data: rest,
    });
    blocks
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("block index {0} exceeds maximum {}", MAX_BLOCK_INDEX)]
    IndexOverflow(u32),

    #[error("reserved block size exponent 7")]
    ReservedSize,
}

// ── Tests ────────────────────────────────────────────────────────────────────
