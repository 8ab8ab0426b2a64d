//! bamstore core library
//!
//! Storage engine for block-compressed aligned-read archives: the record
//! codec, hierarchical binning and linear indexes, the offset side-index,
//! coordinate queries, and the write-side indexer.

pub mod bgzf;
pub mod binning;
pub mod header;
pub mod index;
pub mod reader;
pub mod record;
pub mod validate;
pub mod virtual_offset;
pub mod writer;

mod async_writer;

// Re-export commonly used types
pub use async_writer::AsyncBamWriter;
pub use binning::BinningScheme;
pub use header::{Header, SequenceDictionary, SortOrder};
pub use index::query::{optimize_intervals, Interval};
pub use index::{Chunk, Index, IndexBuilder, SbiBuilder, SbiIndex};
pub use reader::{BamReader, ReadError};
pub use record::{Cigar, CigarElement, CigarOp, Flags, RawRecord, Record};
pub use validate::ValidationStringency;
pub use virtual_offset::VirtualOffset;
pub use writer::{BamWriter, IndexingWriter, WriteError};

/// Version information for the bamstore core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
