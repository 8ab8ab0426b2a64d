//! Semantic record validation and the stringency policy.
//!
//! Structural decoding problems are fatal in the codec; the checks here
//! cover records that decode fine but violate semantic invariants. How a
//! failure surfaces is governed by [`ValidationStringency`]: strict callers
//! get an error, lenient callers get a log line and keep going, silent
//! callers get nothing.

use thiserror::Error;

use crate::header::SequenceDictionary;
use crate::record::cigar::CigarError;
use crate::record::{Record, MAX_TEMPLATE_LENGTH};

/// How semantic validation failures are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationStringency {
    /// Fail on the first violation.
    #[default]
    Strict,
    /// Report violations to the diagnostic log and continue.
    Lenient,
    /// Ignore violations.
    Silent,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("record {name}: mapped but the alignment operation run is empty")]
    MappedWithoutCigar { name: String },

    #[error("record {name}: no aligning operation in the operation run")]
    NoAlignmentOperator { name: String },

    #[error("record {name}: {source}")]
    Cigar {
        name: String,
        #[source]
        source: CigarError,
    },

    #[error("record {name}: operations consume {cigar_len} read bases, sequence holds {seq_len}")]
    ReadLengthMismatch {
        name: String,
        cigar_len: u32,
        seq_len: usize,
    },

    #[error("record {name}: mate flags set on an unpaired record")]
    MateFlagsOnUnpaired { name: String },

    #[error("record {name}: template length {tlen} exceeds 2^29 in magnitude")]
    TemplateLengthOutOfRange { name: String, tlen: i32 },

    #[error(
        "record {name}: alignment end {end} past the end of reference {ref_name} ({ref_len})"
    )]
    PastReferenceEnd {
        name: String,
        end: i64,
        ref_name: String,
        ref_len: u32,
    },

    #[error("record {name}: reference {ref_id} not in the sequence dictionary")]
    UnknownReference { name: String, ref_id: i32 },
}

pub type ValidationResult = Result<(), ValidationError>;

/// Checks one record against the semantic invariants.
///
/// Returns the first violation found; callers route the result through
/// [`apply_stringency`].
pub fn validate_record(record: &Record, dictionary: &SequenceDictionary) -> ValidationResult {
    let name = || record.name().to_string();

    let flags = record.flags();
    if !flags.is_paired()
        && (flags.is_mate_unmapped()
            || flags.is_mate_reverse()
            || flags.is_first_of_pair()
            || flags.is_second_of_pair()
            || flags.is_proper_pair())
    {
        return Err(ValidationError::MateFlagsOnUnpaired { name: name() });
    }

    if record.template_length().unsigned_abs() > MAX_TEMPLATE_LENGTH as u32 {
        return Err(ValidationError::TemplateLengthOutOfRange {
            name: name(),
            tlen: record.template_length(),
        });
    }

    if record.is_mapped() {
        let cigar = record.cigar();
        if cigar.is_empty() {
            return Err(ValidationError::MappedWithoutCigar { name: name() });
        }
        if !cigar.has_alignment_operator() {
            return Err(ValidationError::NoAlignmentOperator { name: name() });
        }
        cigar
            .validate_structure()
            .map_err(|source| ValidationError::Cigar {
                name: name(),
                source,
            })?;

        if !record.bases().is_empty() && cigar.read_length() as usize != record.bases().len() {
            return Err(ValidationError::ReadLengthMismatch {
                name: name(),
                cigar_len: cigar.read_length(),
                seq_len: record.bases().len(),
            });
        }

        match dictionary.get(record.ref_id() as usize) {
            None => {
                return Err(ValidationError::UnknownReference {
                    name: name(),
                    ref_id: record.ref_id(),
                })
            }
            Some(reference) => {
                let end = i64::from(record.pos()) + i64::from(record.alignment_span());
                if end > i64::from(reference.length) {
                    // Permitted by some emitters; kept as its own kind so
                    // lenient callers can tell it apart in the log.
                    return Err(ValidationError::PastReferenceEnd {
                        name: name(),
                        end,
                        ref_name: reference.name.clone(),
                        ref_len: reference.length,
                    });
                }
            }
        }
    }

    Ok(())
}

/// Routes a validation result through the stringency policy.
pub fn apply_stringency(
    stringency: ValidationStringency,
    result: ValidationResult,
) -> ValidationResult {
    match (stringency, result) {
        (_, Ok(())) => Ok(()),
        (ValidationStringency::Strict, Err(e)) => Err(e),
        (ValidationStringency::Lenient, Err(e)) => {
            log::warn!("ignoring validation failure: {e}");
            Ok(())
        }
        (ValidationStringency::Silent, Err(_)) => Ok(()),
    }
}
