//! CIGAR Operations
//!
//! Parsing and geometry of SAM CIGAR strings. The two classification
//! predicates decide which operations consume read bases and which consume
//! contig (reference) bases; every span computed by the extractor derives
//! from them.

use crate::error::ExtendError;

/// One CIGAR operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CigarOp {
    M = b'M',
    I = b'I',
    D = b'D',
    S = b'S',
    H = b'H',
    N = b'N',
    P = b'P',
    X = b'X',
    Eq = b'=',
}

impl CigarOp {
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'M' => Some(Self::M),
            b'I' => Some(Self::I),
            b'D' => Some(Self::D),
            b'S' => Some(Self::S),
            b'H' => Some(Self::H),
            b'N' => Some(Self::N),
            b'P' => Some(Self::P),
            b'X' => Some(Self::X),
            b'=' => Some(Self::Eq),
            _ => None,
        }
    }

    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this operation consumes bases of the read sequence.
    pub const fn consumes_read(self) -> bool {
        matches!(self, Self::M | Self::I | Self::S | Self::X | Self::Eq)
    }

    /// Whether this operation consumes bases of the contig the read is
    /// aligned to.
    pub const fn consumes_ref(self) -> bool {
        matches!(self, Self::M | Self::D | Self::X | Self::Eq)
    }
}

/// One run of a CIGAR operation, count always >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cigar {
    pub op: CigarOp,
    pub count: u32,
}

/// Parses SAM CIGAR text into operation runs.
///
/// `"*"` (alignment without a CIGAR) parses to an empty list. A zero count
/// or an unknown operation character is a malformed alignment.
pub fn parse(text: &str) -> Result<Vec<Cigar>, ExtendError> {
    if text == "*" {
        return Ok(Vec::new());
    }

    let mut ops = Vec::new();
    let mut count: u32 = 0;
    let mut have_digits = false;

    for &b in text.as_bytes() {
        if b.is_ascii_digit() {
            count = count
                .checked_mul(10)
                .and_then(|c| c.checked_add((b - b'0') as u32))
                .ok_or_else(|| {
                    ExtendError::MalformedAlignment(format!("CIGAR count overflow in {:?}", text))
                })?;
            have_digits = true;
        } else {
            let op = CigarOp::from_byte(b).ok_or_else(|| {
                ExtendError::MalformedAlignment(format!(
                    "unknown CIGAR operation {:?} in {:?}",
                    b as char, text
                ))
            })?;
            if !have_digits || count == 0 {
                return Err(ExtendError::MalformedAlignment(format!(
                    "CIGAR operation with count 0 in {:?}",
                    text
                )));
            }
            ops.push(Cigar { op, count });
            count = 0;
            have_digits = false;
        }
    }

    if have_digits {
        return Err(ExtendError::MalformedAlignment(format!(
            "trailing CIGAR count in {:?}",
            text
        )));
    }

    Ok(ops)
}

/// Number of read bases the alignment consumes.
pub fn used_read(ops: &[Cigar]) -> usize {
    ops.iter()
        .filter(|c| c.op.consumes_read())
        .map(|c| c.count as usize)
        .sum()
}

/// Number of contig bases the alignment occupies; the alignment covers
/// contig positions `[begin_pos, begin_pos + used_ref)`.
pub fn used_ref(ops: &[Cigar]) -> usize {
    ops.iter()
        .filter(|c| c.op.consumes_ref())
        .map(|c| c.count as usize)
        .sum()
}

/// Length of the leading soft clip, 0 if the alignment starts aligned.
pub fn leading_clip(ops: &[Cigar]) -> usize {
    match ops.first() {
        Some(c) if c.op == CigarOp::S => c.count as usize,
        _ => 0,
    }
}

/// Length of the trailing soft clip, 0 if the alignment ends aligned.
pub fn trailing_clip(ops: &[Cigar]) -> usize {
    match ops.last() {
        Some(c) if c.op == CigarOp::S => c.count as usize,
        _ => 0,
    }
}
