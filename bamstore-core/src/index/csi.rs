//! On-disk codec for the variable-depth index format.
//!
//! Differs from the fixed-depth layout in three ways: the binning
//! parameters (`min_shift`, depth) and an uninterpreted auxiliary blob are
//! stored in the file, each bin carries its lowest virtual offset, and
//! there is no linear index. The stored depth excludes the root level, so
//! loading adds one.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::binning::BinningScheme;
use crate::virtual_offset::VirtualOffset;

use super::bai::read_count;
use super::linear::LinearIndex;
use super::{Bin, Chunk, Index, IndexError, IndexResult, Metadata, ReferenceIndex};

pub const MAGIC: &[u8; 4] = b"CSI\x01";

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

    let min_shift = reader.read_i32::<LittleEndian>()?;
    let stored_depth = reader.read_i32::<LittleEndian>()?;
    if min_shift < 0 || stored_depth < 0 {
        return Err(IndexError::Corruption(format!(
            "negative binning parameters: min_shift {min_shift}, depth {stored_depth}"
        )));
    }
    // On disk the depth excludes the root level.
    let scheme = BinningScheme::new(min_shift as u32, stored_depth as u32 + 1);

    let aux_len = read_count(reader)?;
    let mut aux = vec![0u8; aux_len];
    reader.read_exact(&mut aux)?;

    let n_ref = read_count(reader)?;
    let mut references = Vec::with_capacity(n_ref);
    for _ in 0..n_ref {
        references.push(read_reference(reader, scheme)?);
    }

    let no_coordinate_count = match reader.read_u64::<LittleEndian>() {
        Ok(count) => Some(count),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => None,
        Err(e) => return Err(e.into()),
    };

    Ok(Index::new(scheme, references, no_coordinate_count).with_aux(aux))
}

pub fn write_index<W: Write>(writer: &mut W, index: &Index) -> IndexResult<()> {
    let scheme = index.scheme();

    writer.write_all(MAGIC)?;
    writer.write_i32::<LittleEndian>(scheme.min_shift() as i32)?;
    writer.write_i32::<LittleEndian>(scheme.depth() as i32 - 1)?;
    writer.write_i32::<LittleEndian>(index.aux().len() as i32)?;
    writer.write_all(index.aux())?;

    writer.write_i32::<LittleEndian>(index.references().len() as i32)?;
    for reference in index.references() {
        write_reference(writer, scheme, reference)?;
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
        let loffset = VirtualOffset::from(reader.read_u64::<LittleEndian>()?);
        let n_chunk = read_count(reader)?;
        let mut chunks = Vec::with_capacity(n_chunk);
        for _ in 0..n_chunk {
            let start = VirtualOffset::from(reader.read_u64::<LittleEndian>()?);
            let end = VirtualOffset::from(reader.read_u64::<LittleEndian>()?);
            chunks.push(Chunk::new(start, end));
        }

        if id == scheme.metadata_bin() {
            metadata = Metadata::from_chunks(&chunks);
        } else {
            bins.insert(id, Bin::with_chunks(id, loffset, chunks));
        }
    }

    // No linear index in this format; queries bound through bin loffsets.
    let linear = LinearIndex::new(scheme.min_shift());
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
        writer.write_u64::<LittleEndian>(bin.loffset().into())?;
        writer.write_i32::<LittleEndian>(bin.chunks().len() as i32)?;
        for chunk in bin.chunks() {
            writer.write_u64::<LittleEndian>(chunk.start.into())?;
            writer.write_u64::<LittleEndian>(chunk.end.into())?;
        }
    }

    if let Some(metadata) = reference.metadata() {
        writer.write_u32::<LittleEndian>(scheme.metadata_bin())?;
        writer.write_u64::<LittleEndian>(VirtualOffset::ZERO.into())?;
        writer.write_i32::<LittleEndian>(2)?;
        for chunk in metadata.to_chunks() {
            writer.write_u64::<LittleEndian>(chunk.start.into())?;
            writer.write_u64::<LittleEndian>(chunk.end.into())?;
        }
    }

    Ok(())
}
