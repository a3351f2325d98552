use crate::chromosome::Chromosome;
use crate::cigar::CigarKind;
use crate::errors::{AppError, Result};
use crate::extract::{IndelToken, extract_base, extract_indels};
use crate::record::AlignmentRecord;
use crate::source::AlignmentSource;

/// Base and indel counts at one reference position.
#[derive(Debug, Clone, PartialEq)]
pub struct Pileup {
    a: u32,
    c: u32,
    g: u32,
    t: u32,
    n: u32,
    del: u32,
    indels: Vec<IndelToken>,
    mapq0_frac: f64,
}

impl Default for Pileup {
    fn default() -> Self {
        Self {
            a: 0,
            c: 0,
            g: 0,
            t: 0,
            n: 0,
            del: 0,
            indels: Vec::new(),
            mapq0_frac: f64::NAN,
        }
    }
}

impl Pileup {
    /// Counts one observed base. Case-insensitive; `-` counts a deletion and
    /// anything else is ignored.
    pub fn inc(&mut self, base: u8) {
        match base.to_ascii_uppercase() {
            b'A' => self.a += 1,
            b'C' => self.c += 1,
            b'G' => self.g += 1,
            b'T' => self.t += 1,
            b'N' => self.n += 1,
            b'-' => self.del += 1,
            _ => {}
        }
    }

    pub fn count_of(&self, base: u8) -> u32 {
        match base.to_ascii_uppercase() {
            b'A' => self.a,
            b'C' => self.c,
            b'G' => self.g,
            b'T' => self.t,
            b'N' => self.n,
            b'-' => self.del,
            _ => 0,
        }
    }

    /// A+C+G+T, plus deletions and `N` calls when requested.
    pub fn depth(&self, count_del: bool, count_n: bool) -> u32 {
        let mut depth = self.a + self.c + self.g + self.t;
        if count_del {
            depth += self.del;
        }
        if count_n {
            depth += self.n;
        }
        depth
    }

    /// Fraction of `mutant` among `wildtype` and `mutant` observations. NaN
    /// when neither was observed.
    pub fn frequency(&self, wildtype: u8, mutant: u8) -> f64 {
        let wildtype_count = f64::from(self.count_of(wildtype));
        let mutant_count = f64::from(self.count_of(mutant));
        mutant_count / (wildtype_count + mutant_count)
    }

    pub fn add_indel(&mut self, indel: IndelToken) {
        self.indels.push(indel);
    }

    pub fn add_indels(&mut self, indels: impl IntoIterator<Item = IndelToken>) {
        self.indels.extend(indels);
    }

    pub fn indels(&self) -> &[IndelToken] {
        &self.indels
    }

    /// Fraction of mapped reads with mapping quality 0. NaN when no read was
    /// mapped at the position.
    pub fn mapq0_frac(&self) -> f64 {
        self.mapq0_frac
    }

    pub fn set_mapq0_frac(&mut self, fraction: f64) {
        self.mapq0_frac = fraction;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PileupParams {
    /// `None` disables indel collection; `Some(0)` collects indels anchored
    /// exactly at the position.
    pub indel_window: Option<u32>,
    pub min_mapq: u8,
    pub min_baseq: u8,
    /// Count reads that are not properly paired (single-end and long reads).
    pub include_improper_pairs: bool,
}

impl Default for PileupParams {
    fn default() -> Self {
        Self {
            indel_window: None,
            min_mapq: 1,
            min_baseq: 0,
            include_improper_pairs: false,
        }
    }
}

fn passes_pileup_filter(record: &AlignmentRecord, params: &PileupParams) -> bool {
    if !record.flags.proper_pair && !params.include_improper_pairs {
        return false;
    }
    record.is_primary() && !record.flags.duplicate && record.is_mapped()
}

pub fn pileup<S: AlignmentSource + ?Sized>(
    source: &mut S,
    chromosome: &Chromosome,
    pos: u32,
    params: &PileupParams,
) -> Result<Pileup> {
    source.set_region(chromosome, pos, pos)?;

    let mut output = Pileup::default();
    let mut reads_mapped = 0u32;
    let mut reads_mapq0 = 0u32;
    while let Some(record) = source.next_alignment()? {
        if !passes_pileup_filter(&record, params) {
            continue;
        }
        if pos < record.start || pos > record.end() {
            continue;
        }

        reads_mapped += 1;
        if record.mapq == 0 {
            reads_mapq0 += 1;
        }
        if record.mapq < params.min_mapq {
            continue;
        }

        let call = extract_base(&record, pos)?;
        if call.quality >= i32::from(params.min_baseq) {
            output.inc(call.base);
        }
        if let Some(window) = params.indel_window {
            output.add_indels(extract_indels(&record, pos, window));
        }
    }

    output.set_mapq0_frac(f64::from(reads_mapq0) / f64::from(reads_mapped));
    Ok(output)
}

/// One pileup per position of `start..=end`, built from a single CIGAR walk
/// per alignment. With an indel window, each position collects the indels
/// anchored within `pos ± window`, matching [`pileup`].
pub fn pileups<S: AlignmentSource + ?Sized>(
    source: &mut S,
    chromosome: &Chromosome,
    start: u32,
    end: u32,
    params: &PileupParams,
) -> Result<Vec<Pileup>> {
    if end < start {
        return Err(AppError::argument(format!(
            "pileup range {chromosome}:{start}-{end} ends before it starts"
        )));
    }
    let mut output = vec![Pileup::default(); (end - start + 1) as usize];
    let mut reads_mapped = vec![0u32; output.len()];
    let mut reads_mapq0 = vec![0u32; output.len()];
    let slot = move |pos: u32| (start..=end).contains(&pos).then(|| (pos - start) as usize);

    source.set_region(chromosome, start, end)?;
    while let Some(record) = source.next_alignment()? {
        if !passes_pileup_filter(&record, params) {
            continue;
        }
        for pos in record.start.max(start)..=record.end().min(end) {
            if let Some(index) = slot(pos) {
                reads_mapped[index] += 1;
                if record.mapq == 0 {
                    reads_mapq0[index] += 1;
                }
            }
        }
        if record.mapq < params.min_mapq {
            continue;
        }

        // an indel is reported at every covered position within the window of its anchor
        let (span_start, span_end) = (record.start.max(start), record.end().min(end));
        let window_slots = move |anchor: u32, window: u32| {
            let first = anchor.saturating_sub(window).max(span_start);
            let last = anchor.saturating_add(window).min(span_end);
            (first..=last).filter_map(slot)
        };

        let mut reference_cursor = record.start;
        let mut read_cursor = 0usize;
        for op in &record.cigar {
            match op.kind {
                CigarKind::Match => {
                    for offset in 0..op.len {
                        let index = read_cursor + offset as usize;
                        let quality = record.qualities.get(index).map_or(255, |q| i32::from(*q));
                        if let Some(pileup) = slot(reference_cursor + offset).map(|i| &mut output[i])
                            && let Some(base) = record.bases.get(index)
                            && quality >= i32::from(params.min_baseq)
                        {
                            pileup.inc(*base);
                        }
                    }
                    reference_cursor += op.len;
                    read_cursor += op.len as usize;
                }
                CigarKind::Insertion => {
                    if let Some(window) = params.indel_window {
                        let insert_end = (read_cursor + op.len as usize).min(record.bases.len());
                        let bases = record.bases.get(read_cursor..insert_end).unwrap_or_default();
                        let token = IndelToken::Insertion(bases.to_vec());
                        for index in window_slots(reference_cursor, window) {
                            output[index].add_indel(token.clone());
                        }
                    }
                    read_cursor += op.len as usize;
                }
                CigarKind::Deletion => {
                    if let Some(window) = params.indel_window {
                        for index in window_slots(reference_cursor, window) {
                            output[index].add_indel(IndelToken::Deletion(op.len));
                        }
                    }
                    for offset in 0..op.len {
                        if let Some(index) = slot(reference_cursor + offset) {
                            output[index].inc(b'-');
                        }
                    }
                    reference_cursor += op.len;
                }
                CigarKind::Skip => reference_cursor += op.len,
                CigarKind::SoftClip => read_cursor += op.len as usize,
                CigarKind::HardClip => {}
            }
            if reference_cursor > end.saturating_add(params.indel_window.unwrap_or(0)) {
                break;
            }
        }
    }

    for ((pileup, mapped), mapq0) in output.iter_mut().zip(reads_mapped).zip(reads_mapq0) {
        pileup.set_mapq0_frac(f64::from(mapq0) / f64::from(mapped));
    }
    Ok(output)
}
