//! Framing and compression of a single block.

use std::io::{Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};

use super::{BgzfError, BgzfResult, MAX_BLOCK_SIZE};

/// Fixed gzip member header size up to and including the BC subfield.
pub(super) const HEADER_SIZE: usize = 18;

/// CRC32 + uncompressed-size trailer.
pub(super) const TRAILER_SIZE: usize = 8;

/// Compresses `payload` into a complete framed block: gzip header with the
/// BC size subfield, raw-deflate data, CRC32 and uncompressed length.
pub(super) fn compose_block(payload: &[u8], level: Compression) -> BgzfResult<Vec<u8>> {
    let mut cdata = deflate(payload, level)?;

    // Incompressible payloads can deflate to more than the block limit at
    // high levels; stored-mode deflate always fits the capacity margin.
    if HEADER_SIZE + cdata.len() + TRAILER_SIZE > MAX_BLOCK_SIZE {
        cdata = deflate(payload, Compression::none())?;
        if HEADER_SIZE + cdata.len() + TRAILER_SIZE > MAX_BLOCK_SIZE {
            return Err(BgzfError::BlockOverflow(payload.len()));
        }
    }

    let block_size = HEADER_SIZE + cdata.len() + TRAILER_SIZE;

    let mut block = Vec::with_capacity(block_size);
    block.write_all(&[0x1f, 0x8b])?; // gzip magic
    block.write_u8(0x08)?; // CM = deflate
    block.write_u8(0x04)?; // FLG = FEXTRA
    block.write_u32::<LittleEndian>(0)?; // MTIME
    block.write_u8(0)?; // XFL
    block.write_u8(0xff)?; // OS = unknown
    block.write_u16::<LittleEndian>(6)?; // XLEN
    block.write_all(b"BC")?;
    block.write_u16::<LittleEndian>(2)?; // subfield length
    block.write_u16::<LittleEndian>((block_size - 1) as u16)?; // BSIZE

    block.write_all(&cdata)?;

    let mut crc = Crc::new();
    crc.update(payload);
    block.write_u32::<LittleEndian>(crc.sum())?;
    block.write_u32::<LittleEndian>(payload.len() as u32)?;

    Ok(block)
}

/// Inflates a block's deflate stream and verifies the stored CRC and length.
pub(super) fn inflate_block(
    cdata: &[u8],
    stored_crc: u32,
    declared_len: u32,
) -> BgzfResult<Vec<u8>> {
    let mut data = Vec::with_capacity(declared_len as usize);
    DeflateDecoder::new(cdata).read_to_end(&mut data)?;

    if data.len() as u32 != declared_len {
        return Err(BgzfError::SizeMismatch {
            declared: declared_len,
            actual: data.len() as u32,
        });
    }

    let mut crc = Crc::new();
    crc.update(&data);
    if crc.sum() != stored_crc {
        return Err(BgzfError::CrcMismatch {
            stored: stored_crc,
            computed: crc.sum(),
        });
    }

    Ok(data)
}

fn deflate(payload: &[u8], level: Compression) -> BgzfResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), level);
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}
