//! Read-side facades: sequential record iteration and indexed queries.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::bgzf::{BgzfError, BgzfReader};
use crate::header::{self, Header, HeaderError};
use crate::index::query::{optimize_intervals, Interval};
use crate::index::{query, Chunk, Index, IndexError};
use crate::record::codec::CodecError;
use crate::record::{RawRecord, Record};
use crate::validate::{apply_stringency, validate_record, ValidationError, ValidationStringency};
use crate::virtual_offset::VirtualOffset;

#[derive(Debug, Error)]
pub enum ReadError {
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

    #[error("record stream truncated mid-record")]
    TruncatedRecord,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReadResult<T> = Result<T, ReadError>;

/// Reads records from a block-compressed archive.
pub struct BamReader<R: Read> {
    bgzf: BgzfReader<R>,
    header: Header,
    stringency: ValidationStringency,
}

impl BamReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> ReadResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read> BamReader<R> {
    pub fn from_reader(inner: R) -> ReadResult<Self> {
        let mut bgzf = BgzfReader::new(inner);
        let header = header::read_header(&mut bgzf)?;
        Ok(BamReader {
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

    /// The virtual offset of the next record to be read.
    pub fn virtual_position(&self) -> VirtualOffset {
        self.bgzf.virtual_position()
    }

    /// Reads the next record's byte run, or `None` at end of stream.
    pub fn read_raw_record(&mut self) -> ReadResult<Option<RawRecord>> {
        let mut length_bytes = [0u8; 4];
        match read_fully(&mut self.bgzf, &mut length_bytes)? {
            0 => return Ok(None),
            4 => {}
            _ => return Err(ReadError::TruncatedRecord),
        }
        let block_size = LittleEndian::read_u32(&length_bytes) as usize;

        let mut buf = vec![0u8; block_size];
        self.bgzf
            .read_exact(&mut buf)
            .map_err(|_| ReadError::TruncatedRecord)?;
        Ok(Some(RawRecord::new(buf)?))
    }

    /// Reads and decodes the next record.
    pub fn read_record(&mut self) -> ReadResult<Option<Record>> {
        let raw = match self.read_raw_record()? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let record = raw.decode()?;
        apply_stringency(
            self.stringency,
            validate_record(&record, &self.header.dictionary),
        )?;
        Ok(Some(record))
    }

    /// Lazy iterator over all remaining records.
    pub fn records(&mut self) -> Records<'_, R> {
        Records { reader: self }
    }
}

impl<R: Read + Seek> BamReader<R> {
    /// Positions the reader at a virtual offset.
    pub fn seek_virtual(&mut self, offset: VirtualOffset) -> ReadResult<()> {
        Ok(self.bgzf.seek_virtual(offset)?)
    }

    /// Iterates records overlapping (or, with `contained`, fully inside)
    /// any of the query intervals, using a loaded index to visit only the
    /// relevant byte ranges.
    pub fn query(
        &mut self,
        index: &Index,
        intervals: Vec<Interval>,
        contained: bool,
    ) -> ReadResult<Query<'_, R>> {
        let intervals = optimize_intervals(intervals);

        let mut chunks = Vec::new();
        for interval in &intervals {
            chunks.extend(index.query_chunks(interval.ref_id, interval.start, interval.end)?);
        }
        let chunks = query::coalesce_chunks(chunks);

        Ok(Query {
            reader: self,
            intervals,
            contained,
            chunks,
            next_chunk: 0,
            positioned: false,
        })
    }
}

/// Iterator over all records of a reader.
pub struct Records<'a, R: Read> {
    reader: &'a mut BamReader<R>,
}

impl<R: Read> Iterator for Records<'_, R> {
    type Item = ReadResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}

/// Iterator over the records selected by an indexed query.
pub struct Query<'a, R: Read + Seek> {
    reader: &'a mut BamReader<R>,
    intervals: Vec<Interval>,
    contained: bool,
    chunks: Vec<Chunk>,
    next_chunk: usize,
    positioned: bool,
}

impl<R: Read + Seek> Query<'_, R> {
    fn matches(&self, record: &Record) -> bool {
        if record.is_unplaced() {
            return false;
        }
        let ref_id = record.ref_id() as usize;
        let start = i64::from(record.pos());
        let end = start + i64::from(record.alignment_span().max(1));
        self.intervals.iter().any(|interval| {
            interval.ref_id == ref_id
                && if self.contained {
                    interval.contains(start, end)
                } else {
                    interval.overlaps(start, end)
                }
        })
    }
}

impl<R: Read + Seek> Iterator for Query<'_, R> {
    type Item = ReadResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk = *self.chunks.get(self.next_chunk)?;
            if !self.positioned {
                if let Err(e) = self.reader.seek_virtual(chunk.start) {
                    return Some(Err(e));
                }
                self.positioned = true;
            }
            if self.reader.virtual_position() >= chunk.end {
                self.next_chunk += 1;
                self.positioned = false;
                continue;
            }

            match self.reader.read_record() {
                Err(e) => return Some(Err(e)),
                Ok(None) => {
                    self.next_chunk += 1;
                    self.positioned = false;
                }
                Ok(Some(record)) => {
                    if self.matches(&record) {
                        return Some(Ok(record));
                    }
                }
            }
        }
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SequenceDictionary;
    use crate::record::Flags;
    use crate::writer::BamWriter;

    fn header() -> Header {
        let mut dictionary = SequenceDictionary::new();
        dictionary.push("chr1", 1 << 20).unwrap();
        Header::new("@HD\tVN:1.6\tSO:coordinate\n", dictionary)
    }

    fn mapped(name: &str, pos: i32) -> Record {
        let mut record = Record::default();
        record.set_name(name);
        record.set_flags(Flags::default());
        record.set_ref_id(0);
        record.set_pos(pos);
        record.set_cigar("4M".parse().unwrap());
        record.set_bases(b"ACGT".to_vec());
        record
    }

    fn archive_with(records: &[Record]) -> Vec<u8> {
        let mut writer = BamWriter::from_writer(Vec::new(), header()).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_sequential_read_back() {
        let records = vec![mapped("a", 10), mapped("b", 20), mapped("c", 30)];
        let bytes = archive_with(&records);

        let mut reader = BamReader::from_reader(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header().dictionary.len(), 1);
        let back: Vec<Record> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(back, records);
    }

    #[test]
    fn test_empty_archive() {
        let bytes = archive_with(&[]);
        let mut reader = BamReader::from_reader(std::io::Cursor::new(bytes)).unwrap();
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_raw_record_fixed_fields() {
        let bytes = archive_with(&[mapped("lazy", 4242)]);
        let mut reader = BamReader::from_reader(std::io::Cursor::new(bytes)).unwrap();
        let raw = reader.read_raw_record().unwrap().unwrap();
        assert_eq!(raw.ref_id(), 0);
        assert_eq!(raw.pos(), 4242);
        assert_eq!(raw.name(), b"lazy");
        assert_eq!(raw.read_len(), 4);
        let record = raw.decode().unwrap();
        assert_eq!(record.name(), "lazy");
    }
}
