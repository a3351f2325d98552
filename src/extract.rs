use crate::cigar::CigarKind;
use crate::errors::{AppError, Result};
use crate::record::AlignmentRecord;
use std::fmt;

/// Base and Phred quality observed at one reference position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseCall {
    pub base: u8,
    pub quality: i32,
}

impl BaseCall {
    pub const DELETED: Self = Self {
        base: b'-',
        quality: 255,
    };
    pub const SKIPPED: Self = Self {
        base: b'~',
        quality: -1,
    };

    pub fn is_deleted(&self) -> bool {
        *self == Self::DELETED
    }

    pub fn is_skipped(&self) -> bool {
        *self == Self::SKIPPED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndelToken {
    Insertion(Vec<u8>),
    Deletion(u32),
}

impl fmt::Display for IndelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insertion(bases) => write!(f, "+{}", String::from_utf8_lossy(bases)),
            Self::Deletion(len) => write!(f, "-{len}"),
        }
    }
}

/// Resolves the base the alignment places at reference position `pos`.
///
/// Deleted positions yield [`BaseCall::DELETED`], skipped (`N`) positions
/// [`BaseCall::SKIPPED`]. A read consisting only of soft clips keeps its
/// mapped start and also yields [`BaseCall::SKIPPED`].
pub fn extract_base(record: &AlignmentRecord, pos: u32) -> Result<BaseCall> {
    if pos < record.start || pos > record.end() {
        return Err(AppError::argument(format!(
            "position {pos} outside alignment {}:{}-{}",
            record.chromosome,
            record.start,
            record.end()
        )));
    }

    let mut reference_cursor = record.start;
    let mut read_cursor = 0usize;
    for op in &record.cigar {
        let len = op.len;
        match op.kind {
            CigarKind::Match => {
                if pos < reference_cursor + len {
                    let index = read_cursor + (pos - reference_cursor) as usize;
                    let base = *record.bases.get(index).ok_or_else(|| {
                        AppError::internal(format!(
                            "read {} shorter than its CIGAR {}",
                            record.name, record.cigar
                        ))
                    })?;
                    let quality = record.qualities.get(index).map_or(255, |q| i32::from(*q));
                    return Ok(BaseCall { base, quality });
                }
                reference_cursor += len;
                read_cursor += len as usize;
            }
            CigarKind::Deletion => {
                if pos < reference_cursor + len {
                    return Ok(BaseCall::DELETED);
                }
                reference_cursor += len;
            }
            CigarKind::Skip => {
                if pos < reference_cursor + len {
                    return Ok(BaseCall::SKIPPED);
                }
                reference_cursor += len;
            }
            CigarKind::Insertion | CigarKind::SoftClip => read_cursor += len as usize,
            CigarKind::HardClip => {}
        }
    }

    Ok(BaseCall::SKIPPED)
}

/// Lists the insertions and deletions of one alignment anchored at `pos`,
/// or within `pos ± window` when `window` is non-zero.
///
/// Insertions are anchored at the reference position following them,
/// deletions at their first deleted base.
pub fn extract_indels(record: &AlignmentRecord, pos: u32, window: u32) -> Vec<IndelToken> {
    let window_start = pos.saturating_sub(window);
    let window_end = pos.saturating_add(window);
    let mut indels = Vec::new();

    let mut reference_cursor = record.start;
    let mut read_cursor = 0usize;
    for op in &record.cigar {
        let in_window = (window_start..=window_end).contains(&reference_cursor);
        match op.kind {
            CigarKind::Match => {
                reference_cursor += op.len;
                read_cursor += op.len as usize;
            }
            CigarKind::Insertion => {
                if in_window {
                    let end = (read_cursor + op.len as usize).min(record.bases.len());
                    let bases = record.bases.get(read_cursor..end).unwrap_or_default();
                    indels.push(IndelToken::Insertion(bases.to_vec()));
                }
                read_cursor += op.len as usize;
            }
            CigarKind::Deletion => {
                if in_window {
                    indels.push(IndelToken::Deletion(op.len));
                }
                reference_cursor += op.len;
            }
            CigarKind::Skip => reference_cursor += op.len,
            CigarKind::SoftClip => read_cursor += op.len as usize,
            CigarKind::HardClip => {}
        }

        if reference_cursor > window_end {
            break;
        }
    }

    indels
}
