//! On-disk codec for the fixed-depth index format.
//!
//! Layout: magic, reference count, then per reference a bin table (each bin
//! its chunk list), the linear index, and optionally a trailing count of
//! records with no coordinate. Per-reference metadata rides in the reserved
//! pseudo-bin as two synthetic chunks.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::binning::BinningScheme;
use crate::virtual_offset::VirtualOffset;

use super::linear::LinearIndex;
use super::{Bin, Chunk, Index, IndexError, IndexResult, Metadata, ReferenceIndex};

pub const MAGIC: &[u8; 4] = b"BAI\x01";

/// Reads an index from a file path.
pub fn read<P: AsRef<Path>>(path: P) -> IndexResult<Index> {
    let mut reader = File::open(path).map(BufReader::new)?;
    read_index(&mut reader)
}

/// Writes an index to a file path.
pub fn write<P: AsRef<Path>>(path: P, index: &Index) -> IndexResult<()> {
    let mut writer = File::create(path).map(BufWriter::new)?;
    write_index(&mut writer, index)?;
    writer.flush()?;
    Ok(())
}

pub fn read_index<R: Read>(reader: &mut R) -> IndexResult<Index> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(IndexError::InvalidMagic(magic));
    }

    let scheme = BinningScheme::default();
    let n_ref = read_count(reader)?;

    let mut references = Vec::with_capacity(n_ref);
    for _ in 0..n_ref {
        references.push(read_reference(reader, scheme)?);
    }

    // The trailing no-coordinate count is optional.
    let no_coordinate_count = match reader.read_u64::<LittleEndian>() {
        Ok(count) => Some(count),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => None,
        Err(e) => return Err(e.into()),
    };

    Ok(Index::new(scheme, references, no_coordinate_count))
}

pub fn write_index<W: Write>(writer: &mut W, index: &Index) -> IndexResult<()> {
    if index.scheme() != BinningScheme::default() {
        return Err(IndexError::Corruption(
            "fixed-depth format requires the default binning scheme".into(),
        ));
    }

    writer.write_all(MAGIC)?;
    writer.write_i32::<LittleEndian>(index.references().len() as i32)?;

    for reference in index.references() {
        write_reference(writer, index.scheme(), reference)?;
    }

    if let Some(count) = index.no_coordinate_count() {
        writer.write_u64::<LittleEndian>(count)?;
    }

    Ok(())
}

fn read_reference<R: Read>(reader: &mut R, scheme: BinningScheme) -> IndexResult<ReferenceIndex> {
    let n_bin = read_count(reader)?;

    let mut bins = std::collections::HashMap::with_capacity(n_bin);
    let mut metadata = None;
    for _ in 0..n_bin {
        let id = reader.read_u32::<LittleEndian>()?;
        let n_chunk = read_count(reader)?;
        let mut chunks = Vec::with_capacity(n_chunk);
        for _ in 0..n_chunk {
            let start = VirtualOffset::from(reader.read_u64::<LittleEndian>()?);
            let end = VirtualOffset::from(reader.read_u64::<LittleEndian>()?);
            chunks.push(Chunk::new(start, end));
        }

        if id == scheme.metadata_bin() {
            metadata = Metadata::from_chunks(&chunks);
            continue;
        }
        // This format stores no per-bin lower bound; chunks arrive in file
        // order, so the first chunk start is the lowest offset in the bin.
        let loffset = chunks
            .first()
            .map(|c| c.start)
            .unwrap_or(VirtualOffset::MAX);
        bins.insert(id, Bin::with_chunks(id, loffset, chunks));
    }

    let n_intv = read_count(reader)?;
    let mut offsets = Vec::with_capacity(n_intv);
    for _ in 0..n_intv {
        offsets.push(VirtualOffset::from(reader.read_u64::<LittleEndian>()?));
    }
    let linear = LinearIndex::from_offsets(offsets, scheme.min_shift());

    Ok(ReferenceIndex::new(bins, linear, metadata))
}

fn write_reference<W: Write>(
    writer: &mut W,
    scheme: BinningScheme,
    reference: &ReferenceIndex,
) -> IndexResult<()> {
    let has_metadata = reference.metadata().is_some();
    let n_bin = reference.bins().len() + usize::from(has_metadata);
    writer.write_i32::<LittleEndian>(n_bin as i32)?;

    let mut ids: Vec<u32> = reference.bins().keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        let bin = &reference.bins()[&id];
        writer.write_u32::<LittleEndian>(id)?;
        writer.write_i32::<LittleEndian>(bin.chunks().len() as i32)?;
        for chunk in bin.chunks() {
            writer.write_u64::<LittleEndian>(chunk.start.into())?;
            writer.write_u64::<LittleEndian>(chunk.end.into())?;
        }
    }

    if let Some(metadata) = reference.metadata() {
        writer.write_u32::<LittleEndian>(scheme.metadata_bin())?;
        writer.write_i32::<LittleEndian>(2)?;
        for chunk in metadata.to_chunks() {
            writer.write_u64::<LittleEndian>(chunk.start.into())?;
            writer.write_u64::<LittleEndian>(chunk.end.into())?;
        }
    }

    writer.write_i32::<LittleEndian>(reference.linear().len() as i32)?;
    for offset in reference.linear().offsets() {
        writer.write_u64::<LittleEndian>((*offset).into())?;
    }

    Ok(())
}

pub(super) fn read_count<R: Read>(reader: &mut R) -> IndexResult<usize> {
    let count = reader.read_i32::<LittleEndian>()?;
    if count < 0 {
        return Err(IndexError::NegativeCount(count));
    }
    Ok(count as usize)
}
