use crate::errors::{AppError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarKind {
    /// `M`, `=` and `X`.
    Match,
    Insertion,
    Deletion,
    /// `N`, skipped reference (introns).
    Skip,
    SoftClip,
    HardClip,
}

impl CigarKind {
    pub fn from_char(op: char) -> Option<Self> {
        match op {
            'M' | '=' | 'X' => Some(Self::Match),
            'I' => Some(Self::Insertion),
            'D' => Some(Self::Deletion),
            'N' => Some(Self::Skip),
            'S' => Some(Self::SoftClip),
            'H' => Some(Self::HardClip),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Match => 'M',
            Self::Insertion => 'I',
            Self::Deletion => 'D',
            Self::Skip => 'N',
            Self::SoftClip => 'S',
            Self::HardClip => 'H',
        }
    }

    pub fn consumes_reference(self) -> bool {
        matches!(self, Self::Match | Self::Deletion | Self::Skip)
    }

    /// Whether the operation consumes bases stored in the record. Hard clips
    /// advance the original read but store nothing.
    pub fn consumes_read(self) -> bool {
        matches!(self, Self::Match | Self::Insertion | Self::SoftClip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CigarOp {
    pub kind: CigarKind,
    pub len: u32,
}

impl CigarOp {
    pub fn new(kind: CigarKind, len: u32) -> Self {
        Self { kind, len }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cigar(Vec<CigarOp>);

impl Cigar {
    pub fn new(ops: Vec<CigarOp>) -> Self {
        Self(ops)
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text == "*" || text.is_empty() {
            return Ok(Self::default());
        }

        let mut ops = Vec::new();
        let mut len: Option<u32> = None;
        for symbol in text.chars() {
            if let Some(digit) = symbol.to_digit(10) {
                let current = len.unwrap_or(0);
                len = Some(
                    current
                        .checked_mul(10)
                        .and_then(|value| value.checked_add(digit))
                        .ok_or_else(|| AppError::ParseError {
                            message: format!("CIGAR operation length overflows in {text}"),
                        })?,
                );
                continue;
            }

            let kind = CigarKind::from_char(symbol).ok_or_else(|| AppError::ParseError {
                message: format!("unsupported CIGAR operation '{symbol}' in {text}"),
            })?;
            let op_len = len.take().ok_or_else(|| AppError::ParseError {
                message: format!("CIGAR operation '{symbol}' without length in {text}"),
            })?;
            ops.push(CigarOp::new(kind, op_len));
        }

        if len.is_some() {
            return Err(AppError::ParseError {
                message: format!("trailing length without operation in CIGAR {text}"),
            });
        }
        Ok(Self(ops))
    }

    pub fn ops(&self) -> &[CigarOp] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CigarOp> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn reference_length(&self) -> u32 {
        self.0
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| op.len)
            .sum()
    }

    /// Number of bases stored in the record (hard clips excluded).
    pub fn read_length(&self) -> u32 {
        self.0
            .iter()
            .filter(|op| op.kind.consumes_read())
            .map(|op| op.len)
            .sum()
    }

    pub fn clipped_bases(&self) -> u32 {
        self.0
            .iter()
            .filter(|op| matches!(op.kind, CigarKind::SoftClip | CigarKind::HardClip))
            .map(|op| op.len)
            .sum()
    }

    pub fn is_spliced(&self) -> bool {
        self.0.iter().any(|op| op.kind == CigarKind::Skip)
    }

    pub fn has_indels(&self) -> bool {
        self.0
            .iter()
            .any(|op| matches!(op.kind, CigarKind::Insertion | CigarKind::Deletion))
    }

    /// Converts the reference positions `clip_start..=clip_end` of an
    /// alignment spanning `start..=end` into soft-clipped bases.
    ///
    /// Deletions inside the clipped span disappear, insertions bordering it
    /// are absorbed into the clip and the stored read length is unchanged.
    /// Returns the rewritten CIGAR and the new 1-based alignment start, which
    /// moves right when the leading reference bases are clipped.
    pub fn soft_clip_range(
        &self,
        start: u32,
        end: u32,
        clip_start: u32,
        clip_end: u32,
    ) -> Result<(Cigar, u32)> {
        if clip_start > clip_end {
            return Err(AppError::argument(format!(
                "soft-clip end {clip_end} is smaller than start {clip_start}"
            )));
        }
        if clip_start < start || clip_start > end {
            return Err(AppError::argument(format!(
                "soft-clip start {clip_start} not within alignment {start}-{end}"
            )));
        }
        if clip_end < start || clip_end > end {
            return Err(AppError::argument(format!(
                "soft-clip end {clip_end} not within alignment {start}-{end}"
            )));
        }
        if let Some(op) = self.0.iter().find(|op| op.kind == CigarKind::Skip) {
            return Err(AppError::argument(format!(
                "unsupported CIGAR operation '{}' for soft-clipping",
                op.kind.as_char()
            )));
        }

        // one (original, rewritten) pair per CIGAR element
        let mut elements = Vec::with_capacity(self.0.iter().map(|op| op.len as usize).sum());
        for op in &self.0 {
            for _ in 0..op.len {
                elements.push((op.kind, op.kind));
            }
        }

        let mut index = 0;
        let mut reference_pos = start;
        while reference_pos <= end {
            let Some(element) = elements.get_mut(index) else {
                return Err(AppError::internal(format!(
                    "CIGAR {self} ends before alignment end {end}"
                )));
            };
            if element.0 != CigarKind::HardClip {
                if (clip_start..=clip_end).contains(&reference_pos) {
                    element.1 = CigarKind::SoftClip;
                }
                if matches!(element.0, CigarKind::Match | CigarKind::Deletion) {
                    reference_pos += 1;
                }
            }
            index += 1;
        }

        let mut ops: Vec<CigarOp> = Vec::new();
        for &(original, rewritten) in &elements {
            if original == CigarKind::Deletion && rewritten == CigarKind::SoftClip {
                continue;
            }
            push_merged(&mut ops, CigarOp::new(rewritten, 1));
        }

        let mut i = 1;
        while i < ops.len() {
            let previous = ops[i - 1].kind;
            let current = ops[i].kind;
            let changed = match (previous, current) {
                (CigarKind::SoftClip, CigarKind::Deletion) => {
                    ops.remove(i);
                    true
                }
                (CigarKind::Deletion, CigarKind::SoftClip) => {
                    ops.remove(i - 1);
                    true
                }
                (CigarKind::SoftClip, CigarKind::Insertion)
                | (CigarKind::Insertion, CigarKind::SoftClip)
                | (CigarKind::SoftClip, CigarKind::SoftClip) => {
                    let absorbed = ops.remove(i).len;
                    ops[i - 1].len += absorbed;
                    ops[i - 1].kind = CigarKind::SoftClip;
                    true
                }
                _ => false,
            };
            if changed {
                i = i.saturating_sub(1).max(1);
            } else {
                i += 1;
            }
        }

        let offset = elements
            .iter()
            .skip_while(|(_, rewritten)| *rewritten == CigarKind::HardClip)
            .take_while(|(_, rewritten)| *rewritten == CigarKind::SoftClip)
            .filter(|(original, _)| matches!(original, CigarKind::Match | CigarKind::Deletion))
            .count() as u32;

        Ok((Cigar(ops), start + offset))
    }
}

fn push_merged(ops: &mut Vec<CigarOp>, op: CigarOp) {
    if let Some(last) = ops.last_mut()
        && last.kind == op.kind
    {
        last.len += op.len;
    } else {
        ops.push(op);
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("*");
        }
        for op in &self.0 {
            write!(f, "{}{}", op.len, op.kind.as_char())?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Cigar {
    type Item = &'a CigarOp;
    type IntoIter = std::slice::Iter<'a, CigarOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
