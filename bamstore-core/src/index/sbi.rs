//! The offset side-index: a sparse record-number to virtual-offset map.
//!
//! Every `G`-th record's starting offset is kept, plus a trailing offset
//! for the end of the stream, giving splittable scans evenly sized work
//! units without reading the archive. Offsets must arrive in file order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::virtual_offset::VirtualOffset;

use super::{IndexError, IndexResult};

pub const MAGIC: &[u8; 4] = b"SBI\x01";

/// Default sampling granularity.
pub const DEFAULT_GRANULARITY: u64 = 4096;

/// A loaded offset side-index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbiIndex {
    /// Total length of the indexed archive in compressed bytes.
    pub file_length: u64,
    pub md5: [u8; 16],
    pub uuid: [u8; 16],
    pub record_count: u64,
    pub granularity: u64,
    /// Ascending sampled offsets; the last one addresses end of stream.
    pub offsets: Vec<VirtualOffset>,
}

impl SbiIndex {
    /// The sampled offsets bracketing record `record_index`, usable as a
    /// scan window. `None` when the index holds no offsets.
    pub fn window_for(&self, record_index: u64) -> Option<(VirtualOffset, VirtualOffset)> {
        if self.offsets.is_empty() {
            return None;
        }
        let slot = (record_index / self.granularity.max(1)) as usize;
        let slot = slot.min(self.offsets.len() - 1);
        let start = self.offsets[slot];
        let end = self
            .offsets
            .get(slot + 1)
            .copied()
            .unwrap_or(*self.offsets.last().unwrap());
        Some((start, end))
    }
}

/// Accumulates sampled offsets while records are written.
pub struct SbiBuilder {
    granularity: u64,
    record_count: u64,
    offsets: Vec<VirtualOffset>,
    last_offset: VirtualOffset,
}

impl Default for SbiBuilder {
    fn default() -> Self {
        SbiBuilder::new(DEFAULT_GRANULARITY)
    }
}

impl SbiBuilder {
    pub fn new(granularity: u64) -> Self {
        SbiBuilder {
            granularity: granularity.max(1),
            record_count: 0,
            offsets: Vec::new(),
            last_offset: VirtualOffset::ZERO,
        }
    }

    /// Observes the starting offset of the next record.
    pub fn add(&mut self, offset: VirtualOffset) -> IndexResult<()> {
        if offset < self.last_offset {
            return Err(IndexError::OffsetInversion {
                prev: self.last_offset,
                next: offset,
            });
        }
        self.last_offset = offset;
        if self.record_count % self.granularity == 0 {
            self.offsets.push(offset);
        }
        self.record_count += 1;
        Ok(())
    }

    /// Seals the index with the end-of-stream offset and archive length.
    pub fn finish(
        mut self,
        final_offset: VirtualOffset,
        file_length: u64,
        md5: [u8; 16],
        uuid: [u8; 16],
    ) -> IndexResult<SbiIndex> {
        if final_offset < self.last_offset {
            return Err(IndexError::OffsetInversion {
                prev: self.last_offset,
                next: final_offset,
            });
        }
        self.offsets.push(final_offset);
        Ok(SbiIndex {
            file_length,
            md5,
            uuid,
            record_count: self.record_count,
            granularity: self.granularity,
            offsets: self.offsets,
        })
    }
}

/// Reads an offset side-index from a file path.
pub fn read<P: AsRef<Path>>(path: P) -> IndexResult<SbiIndex> {
    let mut reader = File::open(path).map(BufReader::new)?;
    read_index(&mut reader)
}

/// Writes an offset side-index to a file path.
pub fn write<P: AsRef<Path>>(path: P, index: &SbiIndex) -> IndexResult<()> {
    let mut writer = File::create(path).map(BufWriter::new)?;
    write_index(&mut writer, index)?;
    writer.flush()?;
    Ok(())
}

pub fn read_index<R: Read>(reader: &mut R) -> IndexResult<SbiIndex> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(IndexError::InvalidMagic(magic));
    }

    let file_length = reader.read_u64::<LittleEndian>()?;
    let mut md5 = [0u8; 16];
    reader.read_exact(&mut md5)?;
    let mut uuid = [0u8; 16];
    reader.read_exact(&mut uuid)?;
    let record_count = reader.read_u64::<LittleEndian>()?;
    let granularity = reader.read_u64::<LittleEndian>()?;
    let offset_count = reader.read_u64::<LittleEndian>()?;

    let mut offsets = Vec::with_capacity(offset_count.min(1 << 20) as usize);
    let mut last = VirtualOffset::ZERO;
    for _ in 0..offset_count {
        let offset = VirtualOffset::from(reader.read_u64::<LittleEndian>()?);
        if offset < last {
            return Err(IndexError::OffsetInversion {
                prev: last,
                next: offset,
            });
        }
        last = offset;
        offsets.push(offset);
    }

    Ok(SbiIndex {
        file_length,
        md5,
        uuid,
        record_count,
        granularity,
        offsets,
    })
}

pub fn write_index<W: Write>(writer: &mut W, index: &SbiIndex) -> IndexResult<()> {
    writer.write_all(MAGIC)?;
    writer.write_u64::<LittleEndian>(index.file_length)?;
    writer.write_all(&index.md5)?;
    writer.write_all(&index.uuid)?;
    writer.write_u64::<LittleEndian>(index.record_count)?;
    writer.write_u64::<LittleEndian>(index.granularity)?;
    writer.write_u64::<LittleEndian>(index.offsets.len() as u64)?;
    for offset in &index.offsets {
        writer.write_u64::<LittleEndian>((*offset).into())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vo(raw: u64) -> VirtualOffset {
        VirtualOffset::from(raw)
    }

    #[test]
    fn test_every_gth_offset_kept() {
        let mut builder = SbiBuilder::new(4);
        for i in 0..10u64 {
            builder.add(vo(i * 0x100)).unwrap();
        }
        let index = builder.finish(vo(0x1000), 4096, [0; 16], [0; 16]).unwrap();
        assert_eq!(index.record_count, 10);
        // Records 0, 4, 8 sampled, plus the end-of-stream offset.
        assert_eq!(index.offsets, vec![vo(0), vo(0x400), vo(0x800), vo(0x1000)]);
    }

    #[test]
    fn test_offset_inversion_is_fatal() {
        let mut builder = SbiBuilder::new(1);
        builder.add(vo(0x500)).unwrap();
        let err = builder.add(vo(0x400)).unwrap_err();
        assert!(matches!(err, IndexError::OffsetInversion { .. }));
    }

    #[test]
    fn test_equal_offsets_allowed() {
        let mut builder = SbiBuilder::new(1);
        builder.add(vo(0x500)).unwrap();
        builder.add(vo(0x500)).unwrap();
        assert!(builder.finish(vo(0x500), 100, [0; 16], [0; 16]).is_ok());
    }

    #[test]
    fn test_roundtrip() {
        let mut builder = SbiBuilder::default();
        for i in 0..10_000u64 {
            builder.add(vo(i << 8)).unwrap();
        }
        let index = builder
            .finish(vo(10_000 << 8), 1 << 20, [1; 16], [2; 16])
            .unwrap();

        let mut buf = Vec::new();
        write_index(&mut buf, &index).unwrap();
        let back = read_index(&mut buf.as_slice()).unwrap();
        assert_eq!(back, index);
        // 10000 records at granularity 4096 sample records 0, 4096, 8192.
        assert_eq!(back.offsets.len(), 4);
    }

    #[test]
    fn test_empty_stream_has_only_the_end_offset() {
        let index = SbiBuilder::default()
            .finish(vo(28), 28, [0; 16], [0; 16])
            .unwrap();
        assert_eq!(index.record_count, 0);
        assert_eq!(index.offsets, vec![vo(28)]);
    }

    #[test]
    fn test_window_for() {
        let mut builder = SbiBuilder::new(2);
        for i in 0..6u64 {
            builder.add(vo(i * 0x10)).unwrap();
        }
        let index = builder.finish(vo(0x100), 256, [0; 16], [0; 16]).unwrap();
        // Offsets: records 0, 2, 4 and the end marker.
        assert_eq!(index.window_for(0), Some((vo(0), vo(0x20))));
        assert_eq!(index.window_for(3), Some((vo(0x20), vo(0x40))));
        assert_eq!(index.window_for(5), Some((vo(0x40), vo(0x100))));
    }
}
