//! Packing and unpacking of one record to and from its byte run.
//!
//! The byte run starts with a 32-byte fixed prefix, then the NUL-terminated
//! name, the packed alignment operations, the nibble-packed bases, one
//! quality byte per base, and the attribute block to the end of the run.
//! The codec is pure: it never touches the containing stream.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::attributes::{self, Array, AttributeError, Tag, Value};
use super::cigar::{Cigar, CigarError, MAX_OPERATIONS};
use super::sequence::{self, SequenceError};
use super::{Flags, Record, FIXED_FIELDS_LEN, MAX_NAME_LEN};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record byte run of {0} bytes is shorter than the fixed fields")]
    TruncatedFixedFields(usize),

    #[error("record name length is zero")]
    EmptyName,

    #[error("record name exceeds {MAX_NAME_LEN} bytes ({0})")]
    NameTooLong(usize),

    #[error("record name is not NUL-terminated")]
    NameNotTerminated,

    #[error("record name contains non-printable bytes")]
    NameNotPrintable,

    #[error("negative read length {0}")]
    NegativeReadLength(i32),

    #[error("declared field lengths need {declared} bytes, record run holds {available}")]
    LengthOverrun { declared: usize, available: usize },

    #[error("quality run holds {qualities} scores for {bases} bases")]
    QualityLengthMismatch { bases: usize, qualities: usize },

    #[error("alignment operations: {0}")]
    Cigar(#[from] CigarError),

    #[error("sequence: {0}")]
    Sequence(#[from] SequenceError),

    #[error("attributes: {0}")]
    Attribute(#[from] AttributeError),

    #[error("out-of-line operations tag holds {actual}, expected a 32-bit integer array")]
    LongCigarWrongType { actual: &'static str },

    #[error(
        "sentinel declares read {sentinel_read} / reference {sentinel_ref}, \
         out-of-line operations give read {actual_read} / reference {actual_ref}"
    )]
    SentinelMismatch {
        sentinel_read: u32,
        sentinel_ref: u32,
        actual_read: u32,
        actual_ref: u32,
    },

    #[error("record with overflowing operation count already carries the reserved CG tag")]
    LongCigarReservedTag,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Decodes one record from its complete byte run.
pub fn decode(buf: &[u8]) -> CodecResult<Record> {
    if buf.len() < FIXED_FIELDS_LEN {
        return Err(CodecError::TruncatedFixedFields(buf.len()));
    }

    let ref_id = LittleEndian::read_i32(&buf[0..4]);
    let pos = LittleEndian::read_i32(&buf[4..8]);
    let name_len = buf[8] as usize;
    let mapq = buf[9];
    let stored_bin = LittleEndian::read_u16(&buf[10..12]);
    let cigar_ops = LittleEndian::read_u16(&buf[12..14]) as usize;
    let flags = Flags::new(LittleEndian::read_u16(&buf[14..16]));
    let read_len = LittleEndian::read_i32(&buf[16..20]);
    let mate_ref_id = LittleEndian::read_i32(&buf[20..24]);
    let mate_pos = LittleEndian::read_i32(&buf[24..28]);
    let template_length = LittleEndian::read_i32(&buf[28..32]);

    if name_len == 0 {
        return Err(CodecError::EmptyName);
    }
    if read_len < 0 {
        return Err(CodecError::NegativeReadLength(read_len));
    }
    let read_len = read_len as usize;

    let name_end = FIXED_FIELDS_LEN + name_len;
    let cigar_end = name_end + 4 * cigar_ops;
    let bases_end = cigar_end + (read_len + 1) / 2;
    let qualities_end = bases_end + read_len;
    if qualities_end > buf.len() {
        return Err(CodecError::LengthOverrun {
            declared: qualities_end,
            available: buf.len(),
        });
    }

    let name_bytes = &buf[FIXED_FIELDS_LEN..name_end];
    if name_bytes[name_len - 1] != 0 {
        return Err(CodecError::NameNotTerminated);
    }
    let name_bytes = &name_bytes[..name_len - 1];
    if !name_bytes.iter().all(|&b| (b'!'..=b'~').contains(&b)) {
        return Err(CodecError::NameNotPrintable);
    }
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    let mut words = Vec::with_capacity(cigar_ops);
    for chunk in buf[name_end..cigar_end].chunks_exact(4) {
        words.push(LittleEndian::read_u32(chunk));
    }
    let mut cigar = Cigar::from_words(&words)?;

    let bases = sequence::unpack_bases(&buf[cigar_end..bases_end], read_len);

    let quality_run = &buf[bases_end..qualities_end];
    let qualities = if sequence::qualities_missing(quality_run) {
        Vec::new()
    } else {
        quality_run.to_vec()
    };

    let mut attrs = attributes::decode_attributes(&buf[qualities_end..])?;

    // A two-element soft-clip/skip stand-in means the true operations were
    // spilled to the CG attribute; fold them back in and drop the tag.
    if cigar.is_sentinel(read_len as u32) {
        if let Some(spilled) = attrs.remove(Tag::LONG_CIGAR) {
            cigar = resolve_long_cigar(spilled, &cigar, read_len as u32)?;
        }
    }

    let mut record = Record::default();
    record.set_name(name);
    record.set_flags(flags);
    record.set_ref_id(ref_id);
    record.set_pos(pos);
    record.set_mapq(mapq);
    record.set_cigar(cigar);
    record.set_bases(bases);
    record.set_qualities(qualities);
    record.set_mate_ref_id(mate_ref_id);
    record.set_mate_pos(mate_pos);
    record.set_template_length(template_length);
    *record.attributes_mut() = attrs;
    record.seed_bin_cache(stored_bin);

    Ok(record)
}

fn resolve_long_cigar(value: Value, sentinel: &Cigar, read_len: u32) -> CodecResult<Cigar> {
    let words: Vec<u32> = match value {
        Value::Array(Array::UInt32(words)) => words,
        Value::Array(Array::Int32(words)) => words.into_iter().map(|w| w as u32).collect(),
        other => {
            return Err(CodecError::LongCigarWrongType {
                actual: match other {
                    Value::Array(_) => "an array of another width",
                    _ => "a non-array value",
                },
            })
        }
    };
    let cigar = Cigar::from_words(&words)?;

    let sentinel_read = sentinel.elements()[0].len;
    let sentinel_ref = sentinel.elements()[1].len;
    let read_consistent = read_len == 0 || cigar.read_length() == sentinel_read;
    if !read_consistent || cigar.reference_length() != sentinel_ref {
        return Err(CodecError::SentinelMismatch {
            sentinel_read,
            sentinel_ref,
            actual_read: cigar.read_length(),
            actual_ref: cigar.reference_length(),
        });
    }

    Ok(cigar)
}

/// Encodes one record to its complete byte run.
pub fn encode(record: &Record) -> CodecResult<Vec<u8>> {
    let name = record.name().as_bytes();
    if name.is_empty() {
        return Err(CodecError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CodecError::NameTooLong(name.len()));
    }
    if !name.iter().all(|&b| (b'!'..=b'~').contains(&b)) {
        return Err(CodecError::NameNotPrintable);
    }

    let bases = record.bases();
    let qualities = record.qualities();
    if !qualities.is_empty() && qualities.len() != bases.len() {
        return Err(CodecError::QualityLengthMismatch {
            bases: bases.len(),
            qualities: qualities.len(),
        });
    }

    // Operation counts past the 16-bit field go out of line: the record
    // slot takes the sentinel, the true words ride the CG attribute.
    let cigar = record.cigar();
    let (stored_cigar, spilled_words) = if cigar.len() > MAX_OPERATIONS {
        if record.attributes().get(Tag::LONG_CIGAR).is_some() {
            return Err(CodecError::LongCigarReservedTag);
        }
        let sentinel = Cigar::sentinel(cigar.read_length(), cigar.reference_length());
        let words = cigar.to_words()?;
        (sentinel, Some(words))
    } else {
        (cigar.clone(), None)
    };

    let mut buf = Vec::with_capacity(
        FIXED_FIELDS_LEN + name.len() + 1 + 4 * stored_cigar.len() + bases.len() * 2,
    );
    buf.resize(FIXED_FIELDS_LEN, 0);
    LittleEndian::write_i32(&mut buf[0..4], record.ref_id());
    LittleEndian::write_i32(&mut buf[4..8], record.pos());
    buf[8] = (name.len() + 1) as u8;
    buf[9] = record.mapq();
    LittleEndian::write_u16(&mut buf[10..12], record.indexing_bin());
    LittleEndian::write_u16(&mut buf[12..14], stored_cigar.len() as u16);
    LittleEndian::write_u16(&mut buf[14..16], record.flags().bits());
    LittleEndian::write_i32(&mut buf[16..20], bases.len() as i32);
    LittleEndian::write_i32(&mut buf[20..24], record.mate_ref_id());
    LittleEndian::write_i32(&mut buf[24..28], record.mate_pos());
    LittleEndian::write_i32(&mut buf[28..32], record.template_length());

    buf.extend_from_slice(name);
    buf.push(0);

    for element in &stored_cigar {
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, element.to_word()?);
        buf.extend_from_slice(&word);
    }

    buf.extend_from_slice(&sequence::pack_bases(bases)?);

    if qualities.is_empty() {
        buf.resize(buf.len() + bases.len(), sequence::MISSING_QUALITY);
    } else {
        buf.extend_from_slice(qualities);
    }

    attributes::encode_attributes(&mut buf, record.attributes())?;
    if let Some(words) = spilled_words {
        attributes::encode_field(&mut buf, Tag::LONG_CIGAR, &Value::Array(Array::UInt32(words)))?;
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CigarOp;

    fn mapped_record() -> Record {
        let mut record = Record::default();
        record.set_name("read/1");
        record.set_flags(Flags::new(Flags::PAIRED | Flags::FIRST_OF_PAIR));
        record.set_ref_id(1);
        record.set_pos(8);
        record.set_mapq(13);
        record.set_cigar("3M1S".parse().unwrap());
        record.set_bases(b"ACGT".to_vec());
        record.set_qualities(vec![45, 35, 43, 50]);
        record.set_mate_ref_id(1);
        record.set_mate_pos(21);
        record.set_template_length(144);
        record
            .attributes_mut()
            .insert("NH".parse().unwrap(), Value::UInt8(1));
        record
    }

    #[test]
    fn test_roundtrip() {
        let record = mapped_record();
        let buf = encode(&record).unwrap();
        let back = decode(&buf).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_known_byte_layout() {
        let buf = encode(&mapped_record()).unwrap();
        let expected = [
            0x01, 0x00, 0x00, 0x00, // ref_id = 1
            0x08, 0x00, 0x00, 0x00, // pos = 8
            0x07, // name length incl. NUL
            0x0d, // mapq = 13
            0x49, 0x12, // bin = 4681
            0x02, 0x00, // two operations
            0x41, 0x00, // flags = paired | first of pair
            0x04, 0x00, 0x00, 0x00, // read length
            0x01, 0x00, 0x00, 0x00, // mate ref_id
            0x15, 0x00, 0x00, 0x00, // mate pos = 21
            0x90, 0x00, 0x00, 0x00, // template length = 144
            b'r', b'e', b'a', b'd', b'/', b'1', 0x00, // name
            0x30, 0x00, 0x00, 0x00, // 3M
            0x14, 0x00, 0x00, 0x00, // 1S
            0x12, 0x48, // ACGT packed
            45, 35, 43, 50, // qualities
            b'N', b'H', b'C', 0x01, // NH:C:1
        ];
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_missing_qualities_encode_as_ff_run() {
        let mut record = mapped_record();
        record.set_qualities(Vec::new());
        let buf = encode(&record).unwrap();
        let qual_start = 32 + 7 + 8 + 2;
        assert_eq!(&buf[qual_start..qual_start + 4], &[0xff; 4]);
        let back = decode(&buf).unwrap();
        assert!(back.qualities().is_empty());
    }

    #[test]
    fn test_default_record_layout() {
        let buf = encode(&Record::default()).unwrap();
        // Unplaced, no cigar, no bases: fixed fields plus "*\0".
        assert_eq!(buf.len(), 34);
        assert_eq!(LittleEndian::read_i32(&buf[0..4]), -1);
        assert_eq!(LittleEndian::read_u16(&buf[10..12]), 4680);
        let back = decode(&buf).unwrap();
        assert_eq!(back, Record::default());
    }

    #[test]
    fn test_quality_length_mismatch_rejected() {
        let mut record = mapped_record();
        record.set_qualities(vec![1, 2]);
        assert!(matches!(
            encode(&record),
            Err(CodecError::QualityLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_run_rejected() {
        let buf = encode(&mapped_record()).unwrap();
        assert!(matches!(
            decode(&buf[..30]),
            Err(CodecError::TruncatedFixedFields(30))
        ));
        // Cutting into the quality run breaks the declared layout.
        assert!(matches!(
            decode(&buf[..40]),
            Err(CodecError::LengthOverrun { .. })
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut buf = encode(&mapped_record()).unwrap();
        buf[8] = 0;
        assert!(matches!(decode(&buf), Err(CodecError::EmptyName)));
    }

    #[test]
    fn test_long_cigar_spills_to_attribute() {
        let mut record = Record::default();
        record.set_name("long");
        record.set_flags(Flags::default());
        record.set_ref_id(0);
        record.set_pos(100);
        let elements: Vec<_> = (0..70_000)
            .map(|_| crate::record::CigarElement::new(CigarOp::Match, 1))
            .collect();
        record.set_cigar(elements.into());
        record.set_bases(vec![b'A'; 70_000]);

        let buf = encode(&record).unwrap();

        // The stored slot holds the sentinel pair.
        assert_eq!(LittleEndian::read_u16(&buf[12..14]), 2);
        let name_end = 32 + 5;
        let first = LittleEndian::read_u32(&buf[name_end..name_end + 4]);
        let second = LittleEndian::read_u32(&buf[name_end + 4..name_end + 8]);
        assert_eq!(first, (70_000 << 4) | 4); // 70000S
        assert_eq!(second, (70_000 << 4) | 3); // 70000N

        let back = decode(&buf).unwrap();
        assert_eq!(back.cigar().len(), 70_000);
        assert!(back.attributes().get(Tag::LONG_CIGAR).is_none());
        assert_eq!(back, record);
    }

    #[test]
    fn test_sentinel_with_inconsistent_spill_rejected() {
        let mut record = Record::default();
        record.set_name("bad");
        record.set_ref_id(0);
        record.set_pos(0);
        record.set_cigar(Cigar::sentinel(4, 100));
        record.set_bases(b"ACGT".to_vec());
        record.attributes_mut().insert(
            Tag::LONG_CIGAR,
            Value::Array(Array::UInt32(vec![(4 << 4) | 0])), // 4M: reference span 4, not 100
        );
        let buf = encode(&record).unwrap();
        assert!(matches!(
            decode(&buf),
            Err(CodecError::SentinelMismatch { .. })
        ));
    }
}
