//! Write-side facades: the archive writer and its indexing wrapper.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use thiserror::Error;

use crate::bgzf::{BgzfError, BgzfWriter};
use crate::binning::BinningScheme;
use crate::header::{self, Header, HeaderError};
use crate::index::{self, Chunk, Index, IndexBuilder, IndexError, SbiBuilder, SbiIndex};
use crate::record::codec::{self, CodecError};
use crate::record::Record;
use crate::validate::{apply_stringency, validate_record, ValidationError, ValidationStringency};
use crate::virtual_offset::VirtualOffset;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("block stream: {0}")]
    Bgzf(#[from] BgzfError),

    #[error("header: {0}")]
    Header(#[from] HeaderError),

    #[error("record codec: {0}")]
    Codec(#[from] CodecError),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("index: {0}")]
    Index(#[from] IndexError),

    #[error("background writer terminated")]
    BackgroundClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WriteResult<T> = Result<T, WriteError>;

/// Writes records into a block-compressed archive.
///
/// The header and sequence dictionary are emitted on construction; each
/// [`write_record`](BamWriter::write_record) call reports the virtual-offset
/// extent the record occupies, which is what the indexer consumes.
pub struct BamWriter<W: Write> {
    bgzf: BgzfWriter<W>,
    header: Header,
    stringency: ValidationStringency,
}

impl BamWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, header: Header) -> WriteResult<Self> {
        let file = File::create(path)?;
        Self::from_writer(BufWriter::new(file), header)
    }
}

impl<W: Write> BamWriter<W> {
    pub fn from_writer(inner: W, header: Header) -> WriteResult<Self> {
        let mut bgzf = BgzfWriter::new(inner);
        header::write_header(&mut bgzf, &header)?;
        Ok(BamWriter {
            bgzf,
            header,
            stringency: ValidationStringency::default(),
        })
    }

    pub fn set_validation_stringency(&mut self, stringency: ValidationStringency) {
        self.stringency = stringency;
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The virtual offset at which the next record will start.
    pub fn virtual_position(&self) -> VirtualOffset {
        self.bgzf.virtual_position()
    }

    /// Encodes and appends one record, returning its virtual-offset extent.
    pub fn write_record(&mut self, record: &Record) -> WriteResult<Chunk> {
        apply_stringency(
            self.stringency,
            validate_record(record, &self.header.dictionary),
        )?;

        let start = self.bgzf.virtual_position();
        let buf = codec::encode(record)?;
        self.bgzf.write_u32::<LittleEndian>(buf.len() as u32)?;
        self.bgzf.write_all(&buf)?;
        Ok(Chunk::new(start, self.bgzf.virtual_position()))
    }

    /// Flushes pending blocks, writes the end-of-stream sentinel, and
    /// returns the underlying sink.
    pub fn finish(self) -> WriteResult<W> {
        Ok(self.bgzf.finish()?)
    }

    /// Like `finish`, additionally reporting the archive's compressed length.
    pub fn finish_with_length(self) -> WriteResult<(W, u64)> {
        Ok(self.bgzf.finish_with_length()?)
    }
}

/// A writer that builds indexes while records are written.
///
/// Every emitted record's chunk feeds the index builder and, when enabled,
/// the offset side-index builder. When constructed over a file path the
/// finished indexes are written as siblings of the archive.
pub struct IndexingWriter<W: Write> {
    writer: BamWriter<W>,
    builder: IndexBuilder,
    sbi: Option<SbiBuilder>,
    index_path: Option<PathBuf>,
    sbi_path: Option<PathBuf>,
}

impl IndexingWriter<BufWriter<File>> {
    /// Creates `<path>` and arranges for `<path>.bai` (and `<path>.sbi`
    /// when the offset index is enabled) to be written on `finish`.
    pub fn create<P: AsRef<Path>>(path: P, header: Header) -> WriteResult<Self> {
        let path = path.as_ref();
        let mut this = Self::new(BamWriter::create(path, header)?)?;
        this.index_path = Some(with_appended_extension(path, "bai"));
        Ok(this)
    }
}

impl<W: Write> IndexingWriter<W> {
    pub fn new(writer: BamWriter<W>) -> WriteResult<Self> {
        let builder = IndexBuilder::for_header(BinningScheme::default(), writer.header())?;
        Ok(IndexingWriter {
            writer,
            builder,
            sbi: None,
            index_path: None,
            sbi_path: None,
        })
    }

    /// Enables the offset side-index at the given sampling granularity.
    pub fn with_offset_index(mut self, granularity: u64) -> Self {
        self.sbi = Some(SbiBuilder::new(granularity));
        if let Some(path) = &self.index_path {
            let archive = path.with_extension("");
            self.sbi_path = Some(with_appended_extension(&archive, "sbi"));
        }
        self
    }

    pub fn header(&self) -> &Header {
        self.writer.header()
    }

    pub fn set_validation_stringency(&mut self, stringency: ValidationStringency) {
        self.writer.set_validation_stringency(stringency);
    }

    pub fn write_record(&mut self, record: &Record) -> WriteResult<Chunk> {
        let chunk = self.writer.write_record(record)?;
        self.builder.add_record(record, chunk)?;
        if let Some(sbi) = &mut self.sbi {
            sbi.add(chunk.start)?;
        }
        Ok(chunk)
    }

    /// Seals the archive and both indexes. Index files are written when the
    /// writer was opened on a path.
    pub fn finish(self) -> WriteResult<(W, Index, Option<SbiIndex>)> {
        let final_offset = self.writer.virtual_position();
        let (sink, file_length) = self.writer.finish_with_length()?;

        let index = self.builder.finish()?;
        let sbi_index = match self.sbi {
            Some(builder) => Some(builder.finish(final_offset, file_length, [0; 16], [0; 16])?),
            None => None,
        };

        if let Some(path) = &self.index_path {
            index::bai::write(path, &index)?;
        }
        if let (Some(path), Some(sbi_index)) = (&self.sbi_path, &sbi_index) {
            index::sbi::write(path, sbi_index)?;
        }

        Ok((sink, index, sbi_index))
    }
}

/// `sample.bam` -> `sample.bam.bai`-style sibling naming.
fn with_appended_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}
