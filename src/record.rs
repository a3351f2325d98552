use crate::chromosome::Chromosome;
use crate::cigar::{Cigar, CigarKind};

/// SAM flag bits used by the scanners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentFlags {
    pub paired: bool,
    pub proper_pair: bool,
    pub unmapped: bool,
    pub mate_unmapped: bool,
    pub reverse: bool,
    pub mate_reverse: bool,
    pub first_in_pair: bool,
    pub second_in_pair: bool,
    pub secondary: bool,
    pub qc_fail: bool,
    pub duplicate: bool,
    pub supplementary: bool,
}

impl AlignmentFlags {
    pub fn from_bits(bits: u16) -> Self {
        Self {
            paired: bits & 0x1 != 0,
            proper_pair: bits & 0x2 != 0,
            unmapped: bits & 0x4 != 0,
            mate_unmapped: bits & 0x8 != 0,
            reverse: bits & 0x10 != 0,
            mate_reverse: bits & 0x20 != 0,
            first_in_pair: bits & 0x40 != 0,
            second_in_pair: bits & 0x80 != 0,
            secondary: bits & 0x100 != 0,
            qc_fail: bits & 0x200 != 0,
            duplicate: bits & 0x400 != 0,
            supplementary: bits & 0x800 != 0,
        }
    }

    pub fn bits(&self) -> u16 {
        [
            (self.paired, 0x1),
            (self.proper_pair, 0x2),
            (self.unmapped, 0x4),
            (self.mate_unmapped, 0x8),
            (self.reverse, 0x10),
            (self.mate_reverse, 0x20),
            (self.first_in_pair, 0x40),
            (self.second_in_pair, 0x80),
            (self.secondary, 0x100),
            (self.qc_fail, 0x200),
            (self.duplicate, 0x400),
            (self.supplementary, 0x800),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |bits, (_, bit)| bits | bit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

/// One decoded alignment. Coordinates are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub name: String,
    pub chromosome: Chromosome,
    pub start: u32,
    pub mapq: u8,
    pub flags: AlignmentFlags,
    pub cigar: Cigar,
    pub bases: Vec<u8>,
    /// Phred qualities without ASCII offset, same length as `bases`.
    pub qualities: Vec<u8>,
    pub insert_size: i64,
    pub mate_chromosome: Option<Chromosome>,
    pub mate_start: Option<u32>,
}

impl AlignmentRecord {
    /// Mapped forward-strand record with mapping quality 60 and bases/qualities
    /// (`A`, 30) filled to the CIGAR's read length.
    pub fn new(chromosome: impl Into<Chromosome>, start: u32, cigar: Cigar) -> Self {
        let read_length = cigar.read_length() as usize;
        Self {
            name: String::new(),
            chromosome: chromosome.into(),
            start,
            mapq: 60,
            flags: AlignmentFlags::default(),
            cigar,
            bases: vec![b'A'; read_length],
            qualities: vec![30; read_length],
            insert_size: 0,
            mate_chromosome: None,
            mate_start: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_mapq(mut self, mapq: u8) -> Self {
        self.mapq = mapq;
        self
    }

    pub fn with_flags(mut self, flags: AlignmentFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_sequence(mut self, bases: &[u8], qualities: &[u8]) -> Self {
        self.bases = bases.to_vec();
        self.qualities = qualities.to_vec();
        self
    }

    pub fn with_insert_size(mut self, insert_size: i64) -> Self {
        self.insert_size = insert_size;
        self
    }

    /// Last reference position covered. A record without reference-consuming
    /// operations reports its start position so base lookups stay anchored.
    pub fn end(&self) -> u32 {
        self.start + self.cigar.reference_length().max(1) - 1
    }

    /// False for records whose CIGAR aligns no reference bases (`50S`,
    /// `3I4S`). Such records add no depth anywhere.
    pub fn covers_reference(&self) -> bool {
        self.cigar.reference_length() > 0
    }

    pub fn strand(&self) -> Strand {
        if self.flags.reverse {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    pub fn read_length(&self) -> usize {
        self.bases.len()
    }

    pub fn is_mapped(&self) -> bool {
        !self.flags.unmapped
    }

    pub fn is_primary(&self) -> bool {
        !self.flags.secondary && !self.flags.supplementary
    }

    /// Filter shared by the coverage scanners and the average-depth
    /// annotator.
    pub fn passes_coverage_filter(&self, min_mapq: u8, include_duplicates: bool) -> bool {
        if self.flags.duplicate && !include_duplicates {
            return false;
        }
        self.is_primary() && self.is_mapped() && self.covers_reference() && self.mapq >= min_mapq
    }

    /// Number of reference positions shared with `start..=end`.
    pub fn overlap(&self, start: u32, end: u32) -> u32 {
        if !self.covers_reference() {
            return 0;
        }
        let overlap_start = self.start.max(start);
        let overlap_end = self.end().min(end);
        if overlap_end < overlap_start {
            0
        } else {
            overlap_end - overlap_start + 1
        }
    }

    /// Fills `mask` with one flag per reference position of the alignment:
    /// `false` where an aligned base has quality below `min_baseq`. Deleted
    /// and skipped positions stay `true`.
    pub fn quality_mask(&self, min_baseq: u8, mask: &mut Vec<bool>) {
        let span = (self.end() - self.start + 1) as usize;
        mask.clear();
        mask.resize(span, true);

        let mut reference_index = 0usize;
        let mut read_index = 0usize;
        for op in &self.cigar {
            let len = op.len as usize;
            match op.kind {
                CigarKind::Match => {
                    for offset in 0..len {
                        let quality = self.qualities.get(read_index + offset).copied();
                        if let Some(quality) = quality
                            && quality < min_baseq
                            && let Some(slot) = mask.get_mut(reference_index + offset)
                        {
                            *slot = false;
                        }
                    }
                    reference_index += len;
                    read_index += len;
                }
                CigarKind::Deletion | CigarKind::Skip => reference_index += len,
                CigarKind::Insertion | CigarKind::SoftClip => read_index += len,
                CigarKind::HardClip => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AlignmentFlags, AlignmentRecord, Strand};
    use crate::cigar::Cigar;

    fn record(start: u32, cigar: &str) -> AlignmentRecord {
        AlignmentRecord::new("chr1", start, Cigar::parse(cigar).expect("expected valid CIGAR"))
    }

    #[test]
    fn end_follows_reference_consuming_operations() {
        assert_eq!(record(100, "10S20M5I3D2N10M").end(), 100 + 20 + 3 + 2 + 10 - 1);
        assert_eq!(record(100, "50S").end(), 100);
        assert_eq!(record(100, "1M").end(), 100);
    }

    #[test]
    fn clip_only_records_cover_no_reference() {
        let clipped = record(100, "50S");
        assert!(!clipped.covers_reference());
        assert!(!clipped.passes_coverage_filter(0, true));
        assert_eq!(clipped.overlap(1, 1000), 0);
        assert!(record(100, "5S1M").covers_reference());
    }

    #[test]
    fn flags_round_trip_through_bits() {
        let flags = AlignmentFlags::from_bits(0x1 | 0x2 | 0x10 | 0x40 | 0x400);
        assert!(flags.paired && flags.proper_pair && flags.reverse && flags.first_in_pair);
        assert!(flags.duplicate);
        assert!(!flags.secondary && !flags.supplementary && !flags.unmapped);
        assert_eq!(flags.bits(), 0x1 | 0x2 | 0x10 | 0x40 | 0x400);

        let reversed = record(1, "5M").with_flags(flags);
        assert_eq!(reversed.strand(), Strand::Reverse);
    }

    #[test]
    fn coverage_filter_rejects_flagged_and_low_mapq_reads() {
        let base = record(1, "10M");
        assert!(base.passes_coverage_filter(1, false));
        assert!(!base.clone().with_mapq(0).passes_coverage_filter(1, false));

        let duplicate = base.clone().with_flags(AlignmentFlags {
            duplicate: true,
            ..AlignmentFlags::default()
        });
        assert!(!duplicate.passes_coverage_filter(1, false));
        assert!(duplicate.passes_coverage_filter(1, true));

        for flags in [
            AlignmentFlags {
                secondary: true,
                ..AlignmentFlags::default()
            },
            AlignmentFlags {
                supplementary: true,
                ..AlignmentFlags::default()
            },
            AlignmentFlags {
                unmapped: true,
                ..AlignmentFlags::default()
            },
        ] {
            assert!(!base.clone().with_flags(flags).passes_coverage_filter(0, true));
        }
    }

    #[test]
    fn overlap_is_inclusive() {
        let read = record(100, "10M");
        assert_eq!(read.overlap(100, 109), 10);
        assert_eq!(read.overlap(105, 200), 5);
        assert_eq!(read.overlap(109, 109), 1);
        assert_eq!(read.overlap(110, 120), 0);
        assert_eq!(read.overlap(1, 99), 0);
    }

    #[test]
    fn quality_mask_spans_reference_and_keeps_deletions() {
        let read = record(10, "2S3M2D2M1I1M").with_sequence(
            b"NNACGTAGC",
            &[40, 40, 30, 5, 30, 30, 5, 40, 30],
        );
        let mut mask = Vec::new();
        read.quality_mask(20, &mut mask);
        assert_eq!(mask, vec![true, false, true, true, true, true, false, true]);

        read.quality_mask(0, &mut mask);
        assert!(mask.iter().all(|flag| *flag));
    }
}
