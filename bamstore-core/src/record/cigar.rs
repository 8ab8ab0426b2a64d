//! Run-length-encoded alignment operations and their on-disk packing.
//!
//! Each operation is stored as one 32-bit word `(length << 4) | opcode`.
//! Operation counts above [`MAX_OPERATIONS`] do not fit the record's 16-bit
//! count field; such alignments are persisted with a two-element sentinel in
//! the record and the true operations in the `CG` attribute.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Largest operation count representable in a record's 16-bit field.
pub const MAX_OPERATIONS: usize = u16::MAX as usize;

/// Largest operation length: the packed word keeps 28 bits for it.
pub const MAX_OP_LENGTH: u32 = (1 << 28) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CigarError {
    #[error("unknown alignment operation code {0}")]
    UnknownOpcode(u8),

    #[error("unknown alignment operation character '{0}'")]
    UnknownOpChar(char),

    #[error("operation length {0} exceeds the 28-bit limit")]
    LengthOverflow(u32),

    #[error("hard clip appears inside the alignment at position {0}")]
    InteriorHardClip(usize),

    #[error("soft clip at position {0} is neither at an end nor inside hard clips")]
    InteriorSoftClip(usize),

    #[error("padding at position {0} is not between real operations")]
    MisplacedPadding(usize),

    #[error("two '{0}' operations with no aligning operation between them")]
    RepeatedIndel(char),

    #[error("cannot parse alignment operations from {0:?}")]
    Parse(String),
}

pub type CigarResult<T> = Result<T, CigarError>;

/// One alignment operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    /// `M`: alignment match or mismatch.
    Match,
    /// `I`: insertion relative to the reference.
    Insertion,
    /// `D`: deletion from the reference.
    Deletion,
    /// `N`: skipped reference region (intron).
    Skip,
    /// `S`: soft-clipped read bases.
    SoftClip,
    /// `H`: hard-clipped bases, absent from the read.
    HardClip,
    /// `P`: silent padding.
    Padding,
    /// `=`: sequence match.
    SequenceMatch,
    /// `X`: sequence mismatch.
    SequenceMismatch,
}

impl CigarOp {
    /// Fixed numeric opcode used in the packed word.
    pub fn code(self) -> u8 {
        match self {
            CigarOp::Match => 0,
            CigarOp::Insertion => 1,
            CigarOp::Deletion => 2,
            CigarOp::Skip => 3,
            CigarOp::SoftClip => 4,
            CigarOp::HardClip => 5,
            CigarOp::Padding => 6,
            CigarOp::SequenceMatch => 7,
            CigarOp::SequenceMismatch => 8,
        }
    }

    pub fn from_code(code: u8) -> CigarResult<Self> {
        match code {
            0 => Ok(CigarOp::Match),
            1 => Ok(CigarOp::Insertion),
            2 => Ok(CigarOp::Deletion),
            3 => Ok(CigarOp::Skip),
            4 => Ok(CigarOp::SoftClip),
            5 => Ok(CigarOp::HardClip),
            6 => Ok(CigarOp::Padding),
            7 => Ok(CigarOp::SequenceMatch),
            8 => Ok(CigarOp::SequenceMismatch),
            other => Err(CigarError::UnknownOpcode(other)),
        }
    }

    pub fn as_char(self) -> char {
        match self {
            CigarOp::Match => 'M',
            CigarOp::Insertion => 'I',
            CigarOp::Deletion => 'D',
            CigarOp::Skip => 'N',
            CigarOp::SoftClip => 'S',
            CigarOp::HardClip => 'H',
            CigarOp::Padding => 'P',
            CigarOp::SequenceMatch => '=',
            CigarOp::SequenceMismatch => 'X',
        }
    }

    pub fn from_char(c: char) -> CigarResult<Self> {
        match c {
            'M' => Ok(CigarOp::Match),
            'I' => Ok(CigarOp::Insertion),
            'D' => Ok(CigarOp::Deletion),
            'N' => Ok(CigarOp::Skip),
            'S' => Ok(CigarOp::SoftClip),
            'H' => Ok(CigarOp::HardClip),
            'P' => Ok(CigarOp::Padding),
            '=' => Ok(CigarOp::SequenceMatch),
            'X' => Ok(CigarOp::SequenceMismatch),
            other => Err(CigarError::UnknownOpChar(other)),
        }
    }

    /// Whether the operation advances through read bases.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarOp::Match
                | CigarOp::Insertion
                | CigarOp::SoftClip
                | CigarOp::SequenceMatch
                | CigarOp::SequenceMismatch
        )
    }

    /// Whether the operation advances along the reference.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOp::Match
                | CigarOp::Deletion
                | CigarOp::Skip
                | CigarOp::SequenceMatch
                | CigarOp::SequenceMismatch
        )
    }

    pub fn is_clipping(self) -> bool {
        matches!(self, CigarOp::SoftClip | CigarOp::HardClip)
    }

    /// M, I, D, N, = or X.
    pub fn is_alignment(self) -> bool {
        !self.is_clipping() && self != CigarOp::Padding
    }
}

/// One `(operation, length)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarElement {
    pub op: CigarOp,
    pub len: u32,
}

impl CigarElement {
    pub fn new(op: CigarOp, len: u32) -> Self {
        CigarElement { op, len }
    }

    /// Packs the element into its 32-bit on-disk word.
    pub fn to_word(self) -> CigarResult<u32> {
        if self.len > MAX_OP_LENGTH {
            return Err(CigarError::LengthOverflow(self.len));
        }
        Ok((self.len << 4) | u32::from(self.op.code()))
    }

    pub fn from_word(word: u32) -> CigarResult<Self> {
        let op = CigarOp::from_code((word & 0xf) as u8)?;
        Ok(CigarElement { op, len: word >> 4 })
    }
}

/// An ordered run of alignment operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cigar(Vec<CigarElement>);

impl Cigar {
    pub fn new() -> Self {
        Cigar(Vec::new())
    }

    pub fn push(&mut self, element: CigarElement) {
        self.0.push(element);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn elements(&self) -> &[CigarElement] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CigarElement> {
        self.0.iter()
    }

    /// Run-length encodes a stream of per-base operations, merging adjacent
    /// identical operations into single elements.
    pub fn from_per_base(ops: impl IntoIterator<Item = CigarOp>) -> Self {
        let mut elements: Vec<CigarElement> = Vec::new();
        for op in ops {
            match elements.last_mut() {
                Some(last) if last.op == op => last.len += 1,
                _ => elements.push(CigarElement::new(op, 1)),
            }
        }
        Cigar(elements)
    }

    /// Reference bases covered by the alignment.
    pub fn reference_length(&self) -> u32 {
        self.0
            .iter()
            .filter(|e| e.op.consumes_reference())
            .map(|e| e.len)
            .sum()
    }

    /// Reference length including silent padding.
    pub fn padded_reference_length(&self) -> u32 {
        self.0
            .iter()
            .filter(|e| e.op.consumes_reference() || e.op == CigarOp::Padding)
            .map(|e| e.len)
            .sum()
    }

    /// Read bases consumed by the alignment.
    pub fn read_length(&self) -> u32 {
        self.0
            .iter()
            .filter(|e| e.op.consumes_read())
            .map(|e| e.len)
            .sum()
    }

    /// Whether any M, I, D, N, `=` or X operation is present.
    pub fn has_alignment_operator(&self) -> bool {
        self.0.iter().any(|e| e.op.is_alignment())
    }

    pub fn to_words(&self) -> CigarResult<Vec<u32>> {
        self.0.iter().map(|e| e.to_word()).collect()
    }

    pub fn from_words(words: &[u32]) -> CigarResult<Self> {
        let elements = words
            .iter()
            .map(|&w| CigarElement::from_word(w))
            .collect::<CigarResult<Vec<_>>>()?;
        Ok(Cigar(elements))
    }

    /// The two-element stand-in stored in a record whose true operations
    /// overflow the 16-bit count field: all read bases soft-clipped, the
    /// reference span skipped.
    pub fn sentinel(read_len: u32, reference_len: u32) -> Self {
        Cigar(vec![
            CigarElement::new(CigarOp::SoftClip, read_len),
            CigarElement::new(CigarOp::Skip, reference_len),
        ])
    }

    /// Whether this run has the exact shape of the overflow sentinel for a
    /// record of `read_len` bases.
    pub fn is_sentinel(&self, read_len: u32) -> bool {
        self.0.len() == 2
            && self.0[0].op == CigarOp::SoftClip
            && (self.0[0].len == read_len || read_len == 0)
            && self.0[1].op == CigarOp::Skip
    }

    /// Checks the structural placement rules: hard clips only at the ends,
    /// soft clips at the ends or inside hard clips, padding only between
    /// real operations, and no repeated insertion or deletion without an
    /// aligning operation between.
    pub fn validate_structure(&self) -> CigarResult<()> {
        let n = self.0.len();
        let mut pending_insertion = false;
        let mut pending_deletion = false;

        for (i, element) in self.0.iter().enumerate() {
            match element.op {
                CigarOp::HardClip => {
                    if i != 0 && i != n - 1 {
                        return Err(CigarError::InteriorHardClip(i));
                    }
                }
                CigarOp::SoftClip => {
                    let at_end = i == 0 || i == n - 1;
                    let beside_hard_clip = (i > 0 && self.0[i - 1].op == CigarOp::HardClip)
                        || (i + 1 < n && self.0[i + 1].op == CigarOp::HardClip);
                    if !at_end && !beside_hard_clip {
                        return Err(CigarError::InteriorSoftClip(i));
                    }
                }
                CigarOp::Padding => {
                    let interior = i > 0 && i + 1 < n;
                    let between_real = interior
                        && !self.0[i - 1].op.is_clipping()
                        && !self.0[i + 1].op.is_clipping();
                    if !between_real {
                        return Err(CigarError::MisplacedPadding(i));
                    }
                }
                _ => {}
            }

            match element.op {
                CigarOp::Insertion => {
                    if pending_insertion {
                        return Err(CigarError::RepeatedIndel('I'));
                    }
                    pending_insertion = true;
                }
                CigarOp::Deletion => {
                    if pending_deletion {
                        return Err(CigarError::RepeatedIndel('D'));
                    }
                    pending_deletion = true;
                }
                CigarOp::Match
                | CigarOp::SequenceMatch
                | CigarOp::SequenceMismatch
                | CigarOp::Skip
                | CigarOp::Padding => {
                    pending_insertion = false;
                    pending_deletion = false;
                }
                CigarOp::SoftClip | CigarOp::HardClip => {}
            }
        }

        Ok(())
    }
}

impl From<Vec<CigarElement>> for Cigar {
    fn from(elements: Vec<CigarElement>) -> Self {
        Cigar(elements)
    }
}

impl<'a> IntoIterator for &'a Cigar {
    type Item = &'a CigarElement;
    type IntoIter = std::slice::Iter<'a, CigarElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "*");
        }
        for element in &self.0 {
            write!(f, "{}{}", element.len, element.op.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Cigar {
    type Err = CigarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Cigar::new());
        }
        let mut elements = Vec::new();
        let mut len: u32 = 0;
        let mut have_digits = false;
        for c in s.chars() {
            if let Some(d) = c.to_digit(10) {
                len = len
                    .checked_mul(10)
                    .and_then(|l| l.checked_add(d))
                    .ok_or(CigarError::LengthOverflow(u32::MAX))?;
                have_digits = true;
            } else {
                if !have_digits {
                    return Err(CigarError::Parse(s.to_string()));
                }
                elements.push(CigarElement::new(CigarOp::from_char(c)?, len));
                len = 0;
                have_digits = false;
            }
        }
        if have_digits {
            return Err(CigarError::Parse(s.to_string()));
        }
        Ok(Cigar(elements))
    }
}
