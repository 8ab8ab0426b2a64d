//! Writing side of the block layer.

use std::io::Write;

use flate2::Compression;

use super::block;
use super::{BgzfResult, BLOCK_PAYLOAD_CAPACITY, EOF_BLOCK};
use crate::virtual_offset::VirtualOffset;

/// A writer that packs bytes into compressed blocks.
///
/// Bytes accumulate in an in-memory payload buffer and are framed into a
/// block whenever the buffer reaches capacity or `flush_block` is called.
/// The writer tracks the virtual offset of the next byte so callers can
/// record the extent of each item they append.
pub struct BgzfWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    /// File offset at which the next block will start.
    address: u64,
    level: Compression,
}

impl<W: Write> BgzfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_compression(inner, Compression::default())
    }

    pub fn with_compression(inner: W, level: Compression) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(BLOCK_PAYLOAD_CAPACITY),
            address: 0,
            level,
        }
    }

    /// The virtual offset of the next byte to be written.
    pub fn virtual_position(&self) -> VirtualOffset {
        VirtualOffset::new(self.address, self.buf.len() as u16)
    }

    /// Compressed bytes emitted so far, not counting the buffered payload.
    pub fn compressed_position(&self) -> u64 {
        self.address
    }

    /// Frames and writes the buffered payload as one block.
    pub fn flush_block(&mut self) -> BgzfResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let framed = block::compose_block(&self.buf, self.level)?;
        self.inner.write_all(&framed)?;
        self.address += framed.len() as u64;
        self.buf.clear();
        Ok(())
    }

    /// Flushes pending payload, appends the end-of-stream sentinel block,
    /// and returns the underlying writer. The total compressed length is
    /// available via `compressed_position` on a kept reference, or as the
    /// length of the returned sink.
    pub fn finish(mut self) -> BgzfResult<W> {
        self.flush_block()?;
        self.inner.write_all(&EOF_BLOCK)?;
        self.address += EOF_BLOCK.len() as u64;
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Like `finish`, but reports the final compressed stream length.
    pub fn finish_with_length(self) -> BgzfResult<(W, u64)> {
        let mut this = self;
        this.flush_block()?;
        this.inner.write_all(&EOF_BLOCK)?;
        this.address += EOF_BLOCK.len() as u64;
        this.inner.flush()?;
        Ok((this.inner, this.address))
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let space = BLOCK_PAYLOAD_CAPACITY - self.buf.len();
            let n = space.min(rest.len());
            self.buf.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            if self.buf.len() == BLOCK_PAYLOAD_CAPACITY {
                self.flush_block()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_block()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.inner.flush()
    }
}
