//! Block-compressed stream framing.
//!
//! The record stream is stored as a series of gzip members ("blocks"), each
//! at most 64 KiB in both compressed and uncompressed form, carrying its own
//! encoded size in a `BC` extra subfield so a reader can hop block to block
//! without inflating. Any byte of the stream is addressable by a
//! [`VirtualOffset`](crate::VirtualOffset). The deflate algorithm itself is
//! an external primitive; only the framing lives here.

mod block;
mod reader;
mod writer;

pub use self::reader::BgzfReader;
pub use self::writer::BgzfWriter;

use thiserror::Error;

/// Maximum encoded size of one block, including framing.
pub const MAX_BLOCK_SIZE: usize = 1 << 16;

/// Uncompressed payload capacity of one block. Kept below the encoded
/// maximum so that incompressible data still frames into a legal block.
pub const BLOCK_PAYLOAD_CAPACITY: usize = 0xff00;

/// The canonical empty block appended as an end-of-stream sentinel.
pub(crate) const EOF_BLOCK: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Errors from the block layer.
#[derive(Debug, Error)]
pub enum BgzfError {
    #[error("invalid gzip magic at block start: {0:#04x} {1:#04x}")]
    InvalidMagic(u8, u8),

    #[error("block at offset {0} has no BC size subfield")]
    MissingSizeField(u64),

    #[error("block at offset {0} is truncated")]
    Truncated(u64),

    #[error("block payload of {0} bytes does not fit the {MAX_BLOCK_SIZE}-byte block limit")]
    BlockOverflow(usize),

    #[error("block CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("block inflated to {actual} bytes, trailer declares {declared}")]
    SizeMismatch { declared: u32, actual: u32 },

    #[error("virtual offset points past the end of its block ({offset} > {len})")]
    OffsetPastBlockEnd { offset: u16, len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BgzfResult<T> = Result<T, BgzfError>;
