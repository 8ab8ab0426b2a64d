//! Archive header: opaque header text plus the binary sequence dictionary.
//!
//! The textual header is carried as an uninterpreted blob; only the sort
//! order tag on the first `@HD` line is probed, because the indexer refuses
//! input that is not coordinate-sorted. Full text-header parsing belongs to
//! a separate layer.

use std::collections::HashMap;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// Magic signature opening a binary record archive.
pub const MAGIC: &[u8; 4] = b"BAM\x01";

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid archive magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("negative length field in header: {0}")]
    NegativeLength(i32),

    #[error("reference sequence name is not NUL-terminated")]
    UnterminatedName,

    #[error("reference sequence name is not valid UTF-8")]
    InvalidName,

    #[error("duplicate reference sequence name: {0}")]
    DuplicateName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HeaderResult<T> = Result<T, HeaderError>;

/// Declared sort order of a record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Unknown,
    Unsorted,
    QueryName,
    Coordinate,
}

/// One reference sequence: name and length in bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSequence {
    pub name: String,
    pub length: u32,
}

/// Ordered reference sequences with name lookup.
#[derive(Debug, Clone, Default)]
pub struct SequenceDictionary {
    sequences: Vec<ReferenceSequence>,
    by_name: HashMap<String, usize>,
}

impl SequenceDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, length: u32) -> HeaderResult<usize> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(HeaderError::DuplicateName(name));
        }
        let index = self.sequences.len();
        self.by_name.insert(name.clone(), index);
        self.sequences.push(ReferenceSequence { name, length });
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ReferenceSequence> {
        self.sequences.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceSequence> {
        self.sequences.iter()
    }
}

/// Archive header: raw text blob and the sequence dictionary.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub text: String,
    pub dictionary: SequenceDictionary,
}

impl Header {
    pub fn new(text: impl Into<String>, dictionary: SequenceDictionary) -> Self {
        Self {
            text: text.into(),
            dictionary,
        }
    }

    /// Probes the `SO:` tag on the leading `@HD` line, if any.
    pub fn sort_order(&self) -> SortOrder {
        let first = match self.text.lines().next() {
            Some(line) if line.starts_with("@HD") => line,
            _ => return SortOrder::Unknown,
        };
        for field in first.split('\t') {
            if let Some(value) = field.strip_prefix("SO:") {
                return match value {
                    "coordinate" => SortOrder::Coordinate,
                    "queryname" => SortOrder::QueryName,
                    "unsorted" => SortOrder::Unsorted,
                    _ => SortOrder::Unknown,
                };
            }
        }
        SortOrder::Unknown
    }
}

/// Reads the archive magic, header text, and sequence dictionary.
pub fn read_header<R: Read>(reader: &mut R) -> HeaderResult<Header> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(HeaderError::InvalidMagic(magic));
    }

    let l_text = reader.read_i32::<LittleEndian>()?;
    if l_text < 0 {
        return Err(HeaderError::NegativeLength(l_text));
    }
    let mut text_bytes = vec![0u8; l_text as usize];
    reader.read_exact(&mut text_bytes)?;
    // Writers may NUL-pad the text blob.
    while text_bytes.last() == Some(&0) {
        text_bytes.pop();
    }
    let text = String::from_utf8(text_bytes).map_err(|_| HeaderError::InvalidName)?;

    let n_ref = reader.read_i32::<LittleEndian>()?;
    if n_ref < 0 {
        return Err(HeaderError::NegativeLength(n_ref));
    }

    let mut dictionary = SequenceDictionary::new();
    for _ in 0..n_ref {
        let l_name = reader.read_i32::<LittleEndian>()?;
        if l_name <= 0 {
            return Err(HeaderError::NegativeLength(l_name));
        }
        let mut name_bytes = vec![0u8; l_name as usize];
        reader.read_exact(&mut name_bytes)?;
        if name_bytes.pop() != Some(0) {
            return Err(HeaderError::UnterminatedName);
        }
        let name = String::from_utf8(name_bytes).map_err(|_| HeaderError::InvalidName)?;
        let length = reader.read_u32::<LittleEndian>()?;
        dictionary.push(name, length)?;
    }

    Ok(Header { text, dictionary })
}

/// Writes the archive magic, header text, and sequence dictionary.
pub fn write_header<W: Write>(writer: &mut W, header: &Header) -> HeaderResult<()> {
    writer.write_all(MAGIC)?;

    let text = header.text.as_bytes();
    writer.write_i32::<LittleEndian>(text.len() as i32)?;
    writer.write_all(text)?;

    writer.write_i32::<LittleEndian>(header.dictionary.len() as i32)?;
    for sequence in header.dictionary.iter() {
        let name = sequence.name.as_bytes();
        writer.write_i32::<LittleEndian>(name.len() as i32 + 1)?;
        writer.write_all(name)?;
        writer.write_u8(0)?;
        writer.write_u32::<LittleEndian>(sequence.length)?;
    }

    Ok(())
}
