//! Reading side of the block layer.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use super::block::{self, HEADER_SIZE, TRAILER_SIZE};
use super::{BgzfError, BgzfResult};
use crate::virtual_offset::VirtualOffset;

/// A reader over a block-compressed stream.
///
/// Reads are sequential through block contents; when the underlying stream
/// is seekable the reader can additionally jump to any [`VirtualOffset`],
/// which is how chunk iterators position themselves.
pub struct BgzfReader<R> {
    inner: R,
    /// File offset of the block currently buffered.
    block_address: u64,
    /// File offset of the first byte past the buffered block.
    next_address: u64,
    data: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> BgzfReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            block_address: 0,
            next_address: 0,
            data: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// The virtual offset of the next byte this reader will return.
    ///
    /// At a block boundary this is the start of the following block, so that
    /// offsets recorded between records always point at a record start.
    pub fn virtual_position(&self) -> VirtualOffset {
        if self.pos < self.data.len() {
            VirtualOffset::new(self.block_address, self.pos as u16)
        } else {
            VirtualOffset::new(self.next_address, 0)
        }
    }

    /// Whether the end of the stream has been reached.
    pub fn is_eof(&self) -> bool {
        self.eof && self.pos >= self.data.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Loads the next block into the buffer. Returns `false` on a clean end
    /// of stream at a block boundary.
    fn read_block(&mut self) -> BgzfResult<bool> {
        let mut header = [0u8; 12];
        match read_fully(&mut self.inner, &mut header)? {
            0 => {
                self.eof = true;
                return Ok(false);
            }
            n if n < header.len() => return Err(BgzfError::Truncated(self.next_address)),
            _ => {}
        }

        if header[0] != 0x1f || header[1] != 0x8b {
            return Err(BgzfError::InvalidMagic(header[0], header[1]));
        }
        if header[3] & 0x04 == 0 {
            // No FEXTRA flag means no BC subfield and no way to frame blocks.
            return Err(BgzfError::MissingSizeField(self.next_address));
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        self.inner.read_exact(&mut extra)?;

        let block_size = find_block_size(&extra)
            .ok_or(BgzfError::MissingSizeField(self.next_address))? as usize;
        if block_size < HEADER_SIZE + TRAILER_SIZE || block_size < 12 + xlen + TRAILER_SIZE {
            return Err(BgzfError::Truncated(self.next_address));
        }

        let cdata_len = block_size - 12 - xlen - TRAILER_SIZE;
        let mut cdata = vec![0u8; cdata_len];
        self.inner.read_exact(&mut cdata)?;

        let stored_crc = self.inner.read_u32::<LittleEndian>()?;
        let declared_len = self.inner.read_u32::<LittleEndian>()?;

        self.data = block::inflate_block(&cdata, stored_crc, declared_len)?;
        self.pos = 0;
        self.block_address = self.next_address;
        self.next_address += block_size as u64;

        Ok(true)
    }
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Positions the reader at a virtual offset.
    pub fn seek_virtual(&mut self, offset: VirtualOffset) -> BgzfResult<()> {
        self.inner.seek(SeekFrom::Start(offset.compressed()))?;
        self.next_address = offset.compressed();
        self.data.clear();
        self.pos = 0;
        self.eof = false;

        let within = offset.uncompressed() as usize;
        if within == 0 {
            return Ok(());
        }

        if !self.read_block()? || within > self.data.len() {
            return Err(BgzfError::OffsetPastBlockEnd {
                offset: offset.uncompressed(),
                len: self.data.len(),
            });
        }
        self.pos = within;
        Ok(())
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.pos < self.data.len() {
                let n = buf.len().min(self.data.len() - self.pos);
                buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            self.read_block()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        }
    }
}

/// Scans gzip extra subfields for the BC block-size field; returns the total
/// encoded block size.
fn find_block_size(extra: &[u8]) -> Option<u32> {
    let mut rest = extra;
    while rest.len() >= 4 {
        let (si1, si2) = (rest[0], rest[1]);
        let slen = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        if rest.len() < 4 + slen {
            return None;
        }
        if si1 == b'B' && si2 == b'C' && slen == 2 {
            let bsize = u16::from_le_bytes([rest[4], rest[5]]);
            return Some(u32::from(bsize) + 1);
        }
        rest = &rest[4 + slen..];
    }
    None
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}
