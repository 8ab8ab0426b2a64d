//! Hierarchical index structures over a block-compressed record stream.
//!
//! Per reference, a sparse map of bins to chunk lists answers "which byte
//! ranges can hold records overlapping this interval", and a linear index
//! of fixed-width windows lower-bounds where those ranges can start. A
//! reserved pseudo-bin carries per-reference record counts and the mapped
//! virtual-offset extent.

pub mod bai;
pub mod builder;
pub mod csi;
pub mod linear;
pub mod query;
pub mod sbi;

pub use self::builder::IndexBuilder;
pub use self::linear::LinearIndex;
pub use self::sbi::{SbiBuilder, SbiIndex};

use std::collections::HashMap;

use thiserror::Error;

use crate::binning::BinningScheme;
use crate::virtual_offset::VirtualOffset;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid index magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("negative count field in index: {0}")]
    NegativeCount(i32),

    #[error("reference {ref_id} out of range for an index over {count} references")]
    ReferenceOutOfRange { ref_id: i32, count: usize },

    #[error(
        "records out of order: reference {ref_id} position {pos} after \
         reference {last_ref} position {last_pos}"
    )]
    OutOfOrder {
        ref_id: i32,
        pos: i32,
        last_ref: i32,
        last_pos: i32,
    },

    #[error("file must be coordinate-sorted for indexing (header declares {0:?})")]
    NotCoordinateSorted(crate::header::SortOrder),

    #[error("record on reference {0} not present in the sequence dictionary")]
    UnknownReference(i32),

    #[error("offsets regressed: {next} after {prev}")]
    OffsetInversion {
        prev: VirtualOffset,
        next: VirtualOffset,
    },

    #[error("indexer already finished")]
    AlreadyFinished,

    #[error("index data corruption: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// A half-open range of virtual offsets covering one or more records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }
}

/// One bin: its chunk list and the lowest virtual offset seen in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    id: u32,
    loffset: VirtualOffset,
    chunks: Vec<Chunk>,
}

impl Bin {
    pub fn new(id: u32) -> Self {
        Bin {
            id,
            loffset: VirtualOffset::MAX,
            chunks: Vec::new(),
        }
    }

    pub(crate) fn with_chunks(id: u32, loffset: VirtualOffset, chunks: Vec<Chunk>) -> Self {
        Bin {
            id,
            loffset,
            chunks,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Lower bound for any record in this bin, used to prune queries.
    pub fn loffset(&self) -> VirtualOffset {
        self.loffset
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Appends a chunk, coalescing with the previous one when it starts in
    /// the same or an adjacent compressed block.
    pub fn add_chunk(&mut self, chunk: Chunk) {
        if chunk.start < self.loffset {
            self.loffset = chunk.start;
        }
        if let Some(last) = self.chunks.last_mut() {
            if chunk.start <= last.end || last.end.same_or_adjacent_block(chunk.start) {
                if chunk.end > last.end {
                    last.end = chunk.end;
                }
                return;
            }
        }
        self.chunks.push(chunk);
    }
}

/// Per-reference counts and mapped extent, persisted in the pseudo-bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    pub first_offset: VirtualOffset,
    pub last_offset: VirtualOffset,
    pub mapped_count: u64,
    pub unmapped_count: u64,
}

impl Metadata {
    /// The two synthetic chunks stored under the pseudo-bin.
    pub fn to_chunks(self) -> [Chunk; 2] {
        [
            Chunk::new(self.first_offset, self.last_offset),
            Chunk::new(
                VirtualOffset::from(self.mapped_count),
                VirtualOffset::from(self.unmapped_count),
            ),
        ]
    }

    pub fn from_chunks(chunks: &[Chunk]) -> Option<Self> {
        if chunks.len() != 2 {
            return None;
        }
        Some(Metadata {
            first_offset: chunks[0].start,
            last_offset: chunks[0].end,
            mapped_count: u64::from(chunks[1].start),
            unmapped_count: u64::from(chunks[1].end),
        })
    }
}

/// The index of one reference sequence.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    bins: HashMap<u32, Bin>,
    linear: LinearIndex,
    metadata: Option<Metadata>,
}

impl ReferenceIndex {
    pub fn new(bins: HashMap<u32, Bin>, linear: LinearIndex, metadata: Option<Metadata>) -> Self {
        ReferenceIndex {
            bins,
            linear,
            metadata,
        }
    }

    pub fn bins(&self) -> &HashMap<u32, Bin> {
        &self.bins
    }

    pub fn bin(&self, id: u32) -> Option<&Bin> {
        self.bins.get(&id)
    }

    pub fn linear(&self) -> &LinearIndex {
        &self.linear
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty() && self.linear.is_empty()
    }
}

/// A complete, immutable index over a record stream.
#[derive(Debug, Clone)]
pub struct Index {
    scheme: BinningScheme,
    references: Vec<ReferenceIndex>,
    no_coordinate_count: Option<u64>,
    /// Uninterpreted auxiliary payload carried by the variable-depth format.
    aux: Vec<u8>,
}

impl Index {
    pub fn new(
        scheme: BinningScheme,
        references: Vec<ReferenceIndex>,
        no_coordinate_count: Option<u64>,
    ) -> Self {
        Index {
            scheme,
            references,
            no_coordinate_count,
            aux: Vec::new(),
        }
    }

    pub fn with_aux(mut self, aux: Vec<u8>) -> Self {
        self.aux = aux;
        self
    }

    pub fn scheme(&self) -> BinningScheme {
        self.scheme
    }

    pub fn references(&self) -> &[ReferenceIndex] {
        &self.references
    }

    pub fn reference(&self, ref_id: usize) -> Option<&ReferenceIndex> {
        self.references.get(ref_id)
    }

    /// Count of records with no coordinate, if the file recorded it.
    pub fn no_coordinate_count(&self) -> Option<u64> {
        self.no_coordinate_count
    }

    pub fn aux(&self) -> &[u8] {
        &self.aux
    }
}
