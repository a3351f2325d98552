use crate::bed::open_input;
use crate::errors::{AppError, Result};
use crate::index::IntervalIndex;
use crate::interval::{self, Interval, base_count, is_merged_and_sorted};
use crate::pileup::Pileup;
use crate::record::AlignmentRecord;
use crate::source::AlignmentSource;
use crate::utils::{format_fixed, percentage};
use bio::io::{fasta, fastq};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum QcMetric {
    Float(f64),
    Int(i64),
    Text(String),
}

impl fmt::Display for QcMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => f.write_str(&format_fixed(*value, 2)),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QcValue {
    /// qcML accession, empty for metrics without one.
    pub accession: &'static str,
    pub name: &'static str,
    pub value: QcMetric,
}

impl QcValue {
    pub fn float(accession: &'static str, name: &'static str, value: f64) -> Self {
        Self {
            accession,
            name,
            value: QcMetric::Float(value),
        }
    }

    pub fn int(accession: &'static str, name: &'static str, value: i64) -> Self {
        Self {
            accession,
            name,
            value: QcMetric::Int(value),
        }
    }

    pub fn text(accession: &'static str, name: &'static str, value: impl Into<String>) -> Self {
        Self {
            accession,
            name,
            value: QcMetric::Text(value.into()),
        }
    }

    /// `100 * part / total`, or `n/a (<reason>)` when `total` is zero.
    pub fn percentage(
        accession: &'static str,
        name: &'static str,
        part: f64,
        total: f64,
        reason: &str,
    ) -> Self {
        match percentage(part, total) {
            Some(value) => Self::float(accession, name, value),
            None => Self::text(accession, name, format!("n/a ({reason})")),
        }
    }

    /// `numerator / denominator`, or `n/a (<reason>)` when the denominator
    /// is zero.
    pub fn ratio(
        accession: &'static str,
        name: &'static str,
        numerator: f64,
        denominator: f64,
        reason: &str,
    ) -> Self {
        if denominator == 0.0 {
            Self::text(accession, name, format!("n/a ({reason})"))
        } else {
            Self::float(accession, name, numerator / denominator)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QcCollection {
    values: Vec<QcValue>,
}

impl QcCollection {
    pub fn insert(&mut self, value: QcValue) {
        self.values.push(value);
    }

    pub fn get(&self, name: &str) -> Option<&QcValue> {
        self.values.iter().find(|value| value.name == name)
    }

    pub fn values(&self) -> &[QcValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn write_tsv<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(b"accession\tname\tvalue\n")?;
        for value in &self.values {
            writeln!(writer, "{}\t{}\t{}", value.accession, value.name, value.value)?;
        }
        Ok(())
    }
}

/// Fixed-width histogram over `[min, max)`. Values outside the range are
/// clamped into the first or last bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    min: f64,
    max: f64,
    bin_size: f64,
    bins: Vec<u64>,
}

impl Histogram {
    pub fn new(min: f64, max: f64, bin_size: f64) -> Result<Self> {
        if bin_size <= 0.0 || max <= min {
            return Err(AppError::argument(format!(
                "invalid histogram range {min}-{max} with bin size {bin_size}"
            )));
        }
        let count = ((max - min) / bin_size).ceil() as usize;
        Ok(Self {
            min,
            max,
            bin_size,
            bins: vec![0; count.max(1)],
        })
    }

    pub fn bin_index(&self, value: f64) -> usize {
        let raw = ((value - self.min) / self.bin_size).floor();
        if raw < 0.0 {
            0
        } else {
            (raw as usize).min(self.bins.len() - 1)
        }
    }

    pub fn inc(&mut self, value: f64) {
        let index = self.bin_index(value);
        self.bins[index] += 1;
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_value(&self, index: usize) -> u64 {
        self.bins.get(index).copied().unwrap_or(0)
    }

    pub fn bin_sum(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// Lower bound of every bin.
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.bins.len())
            .map(|index| self.min + index as f64 * self.bin_size)
            .collect()
    }

    /// Bin counts as percentages of the total.
    pub fn y_percentages(&self) -> Vec<f64> {
        let total = self.bin_sum() as f64;
        self.bins
            .iter()
            .map(|count| {
                if total == 0.0 {
                    0.0
                } else {
                    100.0 * *count as f64 / total
                }
            })
            .collect()
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

const MAX_INSERT_SIZE: u64 = 999;
const NEAR_TARGET_DISTANCE: u32 = 250;
const DEPTH_LEVELS: [(u32, &str, &str); 7] = [
    (10, "QC:2000026", "target region 10x percentage"),
    (20, "QC:2000027", "target region 20x percentage"),
    (30, "QC:2000028", "target region 30x percentage"),
    (50, "QC:2000029", "target region 50x percentage"),
    (100, "QC:2000030", "target region 100x percentage"),
    (200, "QC:2000031", "target region 200x percentage"),
    (500, "QC:2000032", "target region 500x percentage"),
];

#[derive(Debug)]
struct TargetState {
    regions: Vec<Interval>,
    index: IntervalIndex,
    depth: Vec<Vec<u32>>,
    bases: u64,
    gc: Option<GcDropout>,
}

const GC_CHUNK_SIZE: u32 = 100;
const GC_BINS: usize = 101;

/// Fraction of G/C among the A/C/G/T bases of `bases`, ignoring case. NaN
/// when no such base is present.
pub fn gc_content(bases: &[u8]) -> f64 {
    let mut gc = 0u32;
    let mut acgt = 0u32;
    for base in bases {
        match base.to_ascii_uppercase() {
            b'G' | b'C' => {
                gc += 1;
                acgt += 1;
            }
            b'A' | b'T' => acgt += 1,
            _ => {}
        }
    }
    f64::from(gc) / f64::from(acgt)
}

/// Target chunks of about 100 bp binned by GC percentage, with the usable
/// on-target reads distributed over the same bins.
#[derive(Debug)]
struct GcDropout {
    index: IntervalIndex,
    chunk_bins: Vec<Option<usize>>,
    target: Vec<f64>,
    reads: Vec<f64>,
}

impl GcDropout {
    fn new<F>(regions: &[Interval], mut fetch: F) -> Result<Self>
    where
        F: FnMut(&Interval) -> Result<Vec<u8>>,
    {
        let chunks = interval::chunk(regions, GC_CHUNK_SIZE);
        let mut target = vec![0.0; GC_BINS];
        let mut chunk_bins = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let content = gc_content(&fetch(chunk)?);
            let bin = content
                .is_finite()
                .then(|| ((100.0 * content).floor() as usize).min(GC_BINS - 1));
            if let Some(bin) = bin {
                target[bin] += 1.0;
            }
            chunk_bins.push(bin);
        }
        debug!(chunks = chunks.len(), "GC bins of target chunks computed");
        Ok(Self {
            index: IntervalIndex::new(&chunks),
            chunk_bins,
            target,
            reads: vec![0.0; GC_BINS],
        })
    }

    /// A read touching several chunks is shared evenly between them.
    fn add_read(&mut self, record: &AlignmentRecord) {
        let matches = self
            .index
            .matching_indices(&record.chromosome, record.start, record.end());
        let share = 1.0 / matches.len() as f64;
        for chunk_index in matches {
            if let Some(bin) = self.chunk_bins[chunk_index] {
                self.reads[bin] += share;
            }
        }
    }

    /// Summed positive differences between target and read percentages over
    /// the AT-rich (0-50% GC) and GC-rich (50-99% GC) bins.
    fn dropout(&self) -> (f64, f64) {
        let target_sum = self.target.iter().sum::<f64>();
        let read_sum = self.reads.iter().sum::<f64>();
        let mut at_dropout = 0.0;
        let mut gc_dropout = 0.0;
        for bin in 0..GC_BINS - 1 {
            let diff = 100.0 * self.target[bin] / target_sum - 100.0 * self.reads[bin] / read_sum;
            if diff > 0.0 {
                if bin <= 50 {
                    at_dropout += diff;
                }
                if bin >= 50 {
                    gc_dropout += diff;
                }
            }
        }
        (at_dropout, gc_dropout)
    }
}

/// Fetches the reference bases of an interval from an indexed FASTA file
/// (with its `.fai` next to it).
pub fn fasta_fetcher(path: &Path) -> Result<impl FnMut(&Interval) -> Result<Vec<u8>> + use<>> {
    let display = path.display().to_string();
    let mut reader = fasta::IndexedReader::from_file(&path).map_err(|err| {
        AppError::file_access(&display, format!("failed to open indexed FASTA: {err}"))
    })?;
    Ok(move |region: &Interval| {
        reader
            .fetch(
                region.chromosome.as_str(),
                u64::from(region.start.saturating_sub(1)),
                u64::from(region.end),
            )
            .map_err(|err| {
                AppError::file_access(&display, format!("failed FASTA fetch for {region}: {err}"))
            })?;
        let mut bases = Vec::new();
        reader.read(&mut bases).map_err(|err| {
            AppError::file_access(&display, format!("failed FASTA read for {region}: {err}"))
        })?;
        Ok(bases)
    })
}

#[derive(Debug)]
enum Scope {
    Target(TargetState),
    WholeGenome { genome_size: u64 },
}

/// Single-pass mapping statistics over an alignment file.
#[derive(Debug)]
pub struct MappingQc {
    scope: Scope,
    min_mapq: u8,
    total: u64,
    mapped: u64,
    on_target: u64,
    near_target: u64,
    duplicates: u64,
    proper_paired: u64,
    paired_end: bool,
    bases_trimmed: f64,
    bases_mapped: f64,
    bases_clipped: f64,
    insert_size_sum: f64,
    insert_sizes: Histogram,
    bases_usable: u64,
    max_length: usize,
}

impl MappingQc {
    /// Target-region statistics. Regions must be merged and sorted.
    pub fn for_target(regions: &[Interval], min_mapq: u8) -> Result<Self> {
        if !is_merged_and_sorted(regions) {
            return Err(AppError::argument(
                "Merged and sorted BED file required for coverage details statistics!",
            ));
        }
        let state = TargetState {
            regions: regions.to_vec(),
            index: IntervalIndex::new(regions),
            depth: regions
                .iter()
                .map(|region| vec![0; region.length() as usize])
                .collect(),
            bases: base_count(regions),
            gc: None,
        };
        Ok(Self::with_scope(Scope::Target(state), min_mapq))
    }

    /// Enables the AT/GC dropout metrics, reading target bases through
    /// `fetch`. Only available in target mode.
    pub fn with_gc_reference<F>(mut self, fetch: F) -> Result<Self>
    where
        F: FnMut(&Interval) -> Result<Vec<u8>>,
    {
        let Scope::Target(state) = &mut self.scope else {
            return Err(AppError::argument("AT/GC dropout requires a target region"));
        };
        state.gc = Some(GcDropout::new(&state.regions, fetch)?);
        Ok(self)
    }

    /// Whole-genome statistics; non-special chromosomes count as target.
    pub fn whole_genome(genome_size: u64, min_mapq: u8) -> Self {
        Self::with_scope(Scope::WholeGenome { genome_size }, min_mapq)
    }

    fn with_scope(scope: Scope, min_mapq: u8) -> Self {
        Self {
            scope,
            min_mapq,
            total: 0,
            mapped: 0,
            on_target: 0,
            near_target: 0,
            duplicates: 0,
            proper_paired: 0,
            paired_end: false,
            bases_trimmed: 0.0,
            bases_mapped: 0.0,
            bases_clipped: 0.0,
            insert_size_sum: 0.0,
            insert_sizes: Histogram {
                min: 0.0,
                max: MAX_INSERT_SIZE as f64,
                bin_size: 5.0,
                bins: vec![0; 200],
            },
            bases_usable: 0,
            max_length: 0,
        }
    }

    pub fn update(&mut self, record: &AlignmentRecord) {
        if !record.is_primary() {
            return;
        }

        self.total += 1;
        let length = record.read_length();
        self.max_length = self.max_length.max(length);

        let spliced = record.cigar.is_spliced();
        if record.is_mapped() {
            self.mapped += 1;
            self.bases_mapped += length as f64;
            self.bases_clipped += f64::from(record.cigar.clipped_bases());
            self.count_usable(record);
        }

        if record.flags.paired {
            self.paired_end = true;
            if record.flags.proper_pair {
                self.proper_paired += 1;
                if !spliced {
                    let insert_size = record.insert_size.unsigned_abs().min(MAX_INSERT_SIZE);
                    self.insert_size_sum += insert_size as f64;
                    self.insert_sizes.inc(insert_size as f64);
                }
            }
        }

        // first-seen maximum; inexact when the first reads are trimmed
        if length < self.max_length {
            self.bases_trimmed += (self.max_length - length) as f64;
        }
        if record.flags.duplicate {
            self.duplicates += 1;
        }
    }

    fn count_usable(&mut self, record: &AlignmentRecord) {
        let usable = !record.flags.duplicate && record.mapq >= self.min_mapq;
        match &mut self.scope {
            Scope::WholeGenome { .. } => {
                if record.chromosome.is_non_special() {
                    self.on_target += 1;
                    if usable {
                        self.bases_usable += record.read_length() as u64;
                    }
                }
            }
            Scope::Target(state) => {
                let start = record.start;
                let end = record.end();
                if !state.index.overlaps(
                    &record.chromosome,
                    start.saturating_sub(NEAR_TARGET_DISTANCE),
                    end.saturating_add(NEAR_TARGET_DISTANCE),
                ) {
                    return;
                }
                self.near_target += 1;

                let matches = state.index.matching_indices(&record.chromosome, start, end);
                if matches.is_empty() {
                    return;
                }
                self.on_target += 1;
                if !usable || !record.covers_reference() {
                    return;
                }
                for region_index in matches {
                    let region = &state.regions[region_index];
                    let overlap_start = region.start.max(start);
                    let overlap_end = region.end.min(end);
                    self.bases_usable += u64::from(overlap_end - overlap_start + 1);
                    let depth = &mut state.depth[region_index];
                    for pos in overlap_start..=overlap_end {
                        depth[(pos - region.start) as usize] += 1;
                    }
                }
                if let Some(gc) = &mut state.gc {
                    gc.add_read(record);
                }
            }
        }
    }

    pub fn insert_size_histogram(&self) -> &Histogram {
        &self.insert_sizes
    }

    pub fn result(&self) -> QcCollection {
        let total = self.total as f64;
        let mut output = QcCollection::default();
        output.insert(QcValue::percentage(
            "QC:2000019",
            "trimmed base percentage",
            self.bases_trimmed,
            total * self.max_length as f64,
            "no reads",
        ));
        output.insert(QcValue::percentage(
            "QC:2000052",
            "clipped base percentage",
            self.bases_clipped,
            self.bases_mapped,
            "no mapped bases",
        ));
        output.insert(QcValue::percentage(
            "QC:2000020",
            "mapped read percentage",
            self.mapped as f64,
            total,
            "no reads",
        ));
        output.insert(QcValue::percentage(
            "QC:2000021",
            "on-target read percentage",
            self.on_target as f64,
            total,
            "no reads",
        ));
        if matches!(self.scope, Scope::Target(_)) {
            output.insert(QcValue::percentage(
                "QC:2000057",
                "near-target read percentage",
                self.near_target as f64,
                total,
                "no reads",
            ));
        }

        if self.paired_end {
            output.insert(QcValue::percentage(
                "QC:2000022",
                "properly-paired read percentage",
                self.proper_paired as f64,
                total,
                "no reads",
            ));
            output.insert(QcValue::ratio(
                "QC:2000023",
                "insert size",
                self.insert_size_sum,
                self.proper_paired as f64,
                "no properly-paired reads",
            ));
        } else {
            output.insert(QcValue::text(
                "QC:2000022",
                "properly-paired read percentage",
                "n/a (single end)",
            ));
            output.insert(QcValue::text("QC:2000023", "insert size", "n/a (single end)"));
        }

        if self.duplicates == 0 {
            output.insert(QcValue::text(
                "QC:2000024",
                "duplicate read percentage",
                "n/a (duplicates not marked or removed during data analysis)",
            ));
        } else {
            output.insert(QcValue::percentage(
                "QC:2000024",
                "duplicate read percentage",
                self.duplicates as f64,
                total,
                "no reads",
            ));
        }
        output.insert(QcValue::float(
            "QC:2000050",
            "bases usable (MB)",
            self.bases_usable as f64 / 1_000_000.0,
        ));

        match &self.scope {
            Scope::WholeGenome { genome_size } => {
                output.insert(QcValue::ratio(
                    "QC:2000025",
                    "target region read depth",
                    self.bases_usable as f64,
                    *genome_size as f64,
                    "no target bases",
                ));
            }
            Scope::Target(state) => self.insert_depth_metrics(state, &mut output),
        }
        output
    }

    fn insert_depth_metrics(&self, state: &TargetState, output: &mut QcCollection) {
        let roi_bases = state.bases as f64;
        output.insert(QcValue::ratio(
            "QC:2000025",
            "target region read depth",
            self.bases_usable as f64,
            roi_bases,
            "no target bases",
        ));

        let avg_depth = if roi_bases == 0.0 {
            0.0
        } else {
            self.bases_usable as f64 / roi_bases
        };
        let half_depth = (0.5 * avg_depth).round() as u32;

        let mut at_level = [0u64; DEPTH_LEVELS.len()];
        let mut at_half_depth = 0u64;
        for depth in state.depth.iter().flatten() {
            for (count, (level, _, _)) in at_level.iter_mut().zip(DEPTH_LEVELS.iter()) {
                if depth >= level {
                    *count += 1;
                }
            }
            if *depth >= half_depth {
                at_half_depth += 1;
            }
        }

        for (count, (_, accession, name)) in at_level.iter().zip(DEPTH_LEVELS.iter()) {
            output.insert(QcValue::percentage(
                *accession,
                *name,
                *count as f64,
                roi_bases,
                "no target bases",
            ));
        }
        output.insert(QcValue::percentage(
            "QC:2000058",
            "target region half depth percentage",
            at_half_depth as f64,
            roi_bases,
            "no target bases",
        ));

        if let Some(gc) = &state.gc {
            let (at_dropout, gc_dropout) = gc.dropout();
            output.insert(QcValue::float("QC:2000059", "AT dropout", at_dropout));
            output.insert(QcValue::float("QC:2000060", "GC dropout", gc_dropout));
        }
    }
}

/// Runs mapping QC over every record of `source`, in target mode when
/// `target` is given and whole-genome mode otherwise. With a target and an
/// indexed `reference`, AT/GC dropout is reported too.
pub fn mapping_qc<S: AlignmentSource + ?Sized>(
    source: &mut S,
    target: Option<&[Interval]>,
    min_mapq: u8,
    reference: Option<&Path>,
) -> Result<QcCollection> {
    let mut qc = match (target, reference) {
        (Some(regions), Some(reference)) => {
            info!(reference = %reference.display(), "computing AT/GC dropout");
            MappingQc::for_target(regions, min_mapq)?
                .with_gc_reference(fasta_fetcher(reference)?)?
        }
        (Some(regions), None) => MappingQc::for_target(regions, min_mapq)?,
        (None, _) => MappingQc::whole_genome(source.genome_size(false), min_mapq),
    };
    while let Some(record) = source.next_alignment()? {
        qc.update(&record);
    }
    info!(
        reads = qc.total,
        mapped = qc.mapped,
        on_target = qc.on_target,
        "mapping QC finished"
    );
    Ok(qc.result())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Reverse,
}

/// Read-level statistics from FASTQ entries or unaligned/aligned records.
#[derive(Debug, Default)]
pub struct ReadQc {
    long_read: bool,
    forward: u64,
    reverse: u64,
    read_lengths: BTreeMap<usize, u64>,
    bases_sequenced: u64,
    reads_q20: u64,
    bases_q30: u64,
    cycles: Vec<Pileup>,
    qualities_forward: Vec<f64>,
    qualities_reverse: Vec<f64>,
    mean_qualities: BTreeMap<u32, u64>,
}

impl ReadQc {
    pub fn new(long_read: bool) -> Self {
        Self {
            long_read,
            ..Self::default()
        }
    }

    /// `qualities` are Phred scores without ASCII offset.
    pub fn update_read(&mut self, bases: &[u8], qualities: &[u8], direction: ReadDirection) {
        match direction {
            ReadDirection::Forward => self.forward += 1,
            ReadDirection::Reverse => self.reverse += 1,
        }

        let cycles = bases.len();
        self.bases_sequenced += cycles as u64;
        *self.read_lengths.entry(cycles).or_default() += 1;
        if cycles > self.cycles.len() {
            self.cycles.resize(cycles, Pileup::default());
            self.qualities_forward.resize(cycles, 0.0);
            self.qualities_reverse.resize(cycles, 0.0);
        }

        for (pileup, base) in self.cycles.iter_mut().zip(bases) {
            pileup.inc(*base);
        }

        let per_cycle = match direction {
            ReadDirection::Forward => &mut self.qualities_forward,
            ReadDirection::Reverse => &mut self.qualities_reverse,
        };
        let mut quality_sum = 0.0;
        for (cycle, quality) in qualities.iter().take(cycles).enumerate() {
            let quality = f64::from(*quality);
            quality_sum += quality;
            if quality >= 30.0 {
                self.bases_q30 += 1;
            }
            per_cycle[cycle] += quality;
        }

        if cycles > 0 {
            let mean = quality_sum / cycles as f64;
            if mean >= 20.0 {
                self.reads_q20 += 1;
            }
            *self.mean_qualities.entry(mean.round() as u32).or_default() += 1;
        }
    }

    pub fn update_fastq(&mut self, record: &fastq::Record, direction: ReadDirection) {
        let qualities = record
            .qual()
            .iter()
            .map(|quality| quality.saturating_sub(33))
            .collect::<Vec<_>>();
        self.update_read(record.seq(), &qualities, direction);
    }

    /// Direction comes from the pair flags; unpaired reads count as forward.
    pub fn update_record(&mut self, record: &AlignmentRecord) {
        let direction = if !record.flags.paired || record.flags.first_in_pair {
            ReadDirection::Forward
        } else {
            ReadDirection::Reverse
        };
        self.update_read(&record.bases, &record.qualities, direction);
    }

    pub fn read_count(&self) -> u64 {
        self.forward + self.reverse
    }

    /// Per-cycle base composition in percent: A, C, G, T (of called bases)
    /// and N (of all bases).
    pub fn base_composition(&self) -> Vec<[f64; 5]> {
        self.cycles
            .iter()
            .map(|pileup| {
                let called = f64::from(pileup.depth(false, false));
                let share = |base: u8| {
                    if called == 0.0 {
                        0.0
                    } else {
                        100.0 * f64::from(pileup.count_of(base)) / called
                    }
                };
                let all = f64::from(pileup.depth(false, true));
                let n = if all == 0.0 {
                    0.0
                } else {
                    100.0 * f64::from(pileup.count_of(b'N')) / all
                };
                [share(b'A'), share(b'C'), share(b'G'), share(b'T'), n]
            })
            .collect()
    }

    /// Mean quality per cycle for forward and reverse reads.
    pub fn cycle_qualities(&self) -> (Vec<f64>, Vec<f64>) {
        let divisors = self
            .cycles
            .iter()
            .map(|pileup| {
                let depth = f64::from(pileup.depth(false, true));
                if self.reverse > 0 { depth / 2.0 } else { depth }
            })
            .collect::<Vec<_>>();
        let scale = |sums: &[f64]| {
            sums.iter()
                .zip(&divisors)
                .map(|(sum, divisor)| if *divisor == 0.0 { 0.0 } else { sum / divisor })
                .collect::<Vec<_>>()
        };
        (scale(&self.qualities_forward), scale(&self.qualities_reverse))
    }

    /// Shortest read length such that reads at least this long hold more
    /// than `fraction` of all sequenced bases.
    pub fn nx(&self, fraction: f64) -> usize {
        let target = self.bases_sequenced as f64 * fraction;
        let mut bases = 0u64;
        for (length, count) in self.read_lengths.iter().rev() {
            bases += *length as u64 * count;
            if bases as f64 > target {
                return *length;
            }
        }
        0
    }

    fn quality_mode(&self) -> Option<u32> {
        let mut best: Option<(u32, u64)> = None;
        for (quality, count) in &self.mean_qualities {
            if best.is_none_or(|(_, best_count)| *count > best_count) {
                best = Some((*quality, *count));
            }
        }
        best.map(|(quality, _)| quality)
    }

    fn quality_median(&self) -> Option<f64> {
        let total: u64 = self.mean_qualities.values().sum();
        if total == 0 {
            return None;
        }
        let value_at = |rank: u64| {
            let mut seen = 0u64;
            for (quality, count) in &self.mean_qualities {
                seen += count;
                if seen > rank {
                    return f64::from(*quality);
                }
            }
            0.0
        };
        if total % 2 == 1 {
            Some(value_at(total / 2))
        } else {
            Some((value_at(total / 2 - 1) + value_at(total / 2)) / 2.0)
        }
    }

    fn read_length_text(&self) -> String {
        let lengths = self.read_lengths.keys().collect::<Vec<_>>();
        match (lengths.first(), lengths.last()) {
            (None, _) | (_, None) => "n/a (no reads)".to_string(),
            (Some(first), Some(last)) if lengths.len() >= 4 => format!("{first}-{last}"),
            _ => lengths
                .iter()
                .map(|length| length.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    pub fn result(&self) -> QcCollection {
        let mut n = 0u64;
        let mut gc = 0u64;
        let mut bases_total = 0u64;
        for pileup in &self.cycles {
            n += u64::from(pileup.count_of(b'N'));
            gc += u64::from(pileup.count_of(b'G') + pileup.count_of(b'C'));
            bases_total += u64::from(pileup.depth(false, true));
        }
        let reads = self.read_count();
        debug!(reads, bases = bases_total, "read QC summary");

        let mut output = QcCollection::default();
        output.insert(QcValue::int("QC:2000005", "read count", reads as i64));
        output.insert(QcValue::text("QC:2000006", "read length", self.read_length_text()));
        output.insert(QcValue::float(
            "QC:2000049",
            "bases sequenced (MB)",
            self.bases_sequenced as f64 / 1_000_000.0,
        ));
        output.insert(QcValue::percentage(
            "QC:2000007",
            "Q20 read percentage",
            self.reads_q20 as f64,
            reads as f64,
            "no reads",
        ));
        output.insert(QcValue::percentage(
            "QC:2000008",
            "Q30 base percentage",
            self.bases_q30 as f64,
            bases_total as f64,
            "no bases",
        ));
        output.insert(QcValue::percentage(
            "QC:2000009",
            "no base call percentage",
            n as f64,
            bases_total as f64,
            "no bases",
        ));
        output.insert(QcValue::percentage(
            "QC:2000010",
            "gc content percentage",
            gc as f64,
            (bases_total - n) as f64,
            "no called bases",
        ));

        if self.long_read {
            output.insert(QcValue::int("QC:2000131", "N50", self.nx(0.5) as i64));
            output.insert(QcValue::int("", "N95", self.nx(0.95) as i64));
            output.insert(match self.quality_mode() {
                Some(mode) => QcValue::int("", "Q score mode", i64::from(mode)),
                None => QcValue::text("", "Q score mode", "n/a (no reads)"),
            });
            output.insert(match self.quality_median() {
                Some(median) => QcValue::float("", "Q score median", median),
                None => QcValue::text("", "Q score median", "n/a (no reads)"),
            });
        }
        output
    }
}

/// Read QC over FASTQ files, plain or gzip-compressed. Each file carries
/// the direction of all of its reads.
pub fn read_qc_from_fastq(inputs: &[(&Path, ReadDirection)], long_read: bool) -> Result<QcCollection> {
    let mut qc = ReadQc::new(long_read);
    for (path, direction) in inputs {
        let display = path.display().to_string();
        let reader = fastq::Reader::from_bufread(open_input(path)?);
        for record in reader.records() {
            let record = record.map_err(|err| AppError::file_access(&display, err))?;
            qc.update_fastq(&record, *direction);
        }
        debug!(path = %display, reads = qc.read_count(), "FASTQ file processed");
    }
    Ok(qc.result())
}

/// Read QC over the primary records of an alignment file.
pub fn read_qc_from_source<S: AlignmentSource + ?Sized>(
    source: &mut S,
    long_read: bool,
) -> Result<QcCollection> {
    let mut qc = ReadQc::new(long_read);
    while let Some(record) = source.next_alignment()? {
        if !record.is_primary() {
            continue;
        }
        qc.update_record(&record);
    }
    Ok(qc.result())
}

#[cfg(test)]
mod tests {
    use super::{
        Histogram, MappingQc, QcMetric, QcValue, ReadDirection, ReadQc, read_qc_from_fastq,
    };
    use crate::cigar::Cigar;
    use crate::interval::Interval;
    use crate::record::{AlignmentFlags, AlignmentRecord};

    fn mapped(start: u32, cigar: &str) -> AlignmentRecord {
        AlignmentRecord::new("chr1", start, Cigar::parse(cigar).expect("expected valid CIGAR"))
    }

    fn text(qc: &super::QcCollection, name: &str) -> String {
        qc.get(name).expect("expected metric").value.to_string()
    }

    #[test]
    fn zero_denominators_produce_explanations() {
        let value = QcValue::percentage("QC:1", "x", 1.0, 0.0, "no reads");
        assert_eq!(value.value, QcMetric::Text("n/a (no reads)".to_string()));

        let qc = MappingQc::whole_genome(0, 1).result();
        assert_eq!(text(&qc, "mapped read percentage"), "n/a (no reads)");
        assert_eq!(text(&qc, "clipped base percentage"), "n/a (no mapped bases)");
        assert_eq!(text(&qc, "insert size"), "n/a (single end)");
        assert_eq!(
            text(&qc, "duplicate read percentage"),
            "n/a (duplicates not marked or removed during data analysis)"
        );
        assert_eq!(text(&qc, "target region read depth"), "n/a (no target bases)");

        let qc = ReadQc::new(true).result();
        assert_eq!(text(&qc, "Q20 read percentage"), "n/a (no reads)");
        assert_eq!(text(&qc, "read length"), "n/a (no reads)");
    }

    #[test]
    fn histogram_clamps_out_of_range_values() {
        let mut histogram = Histogram::new(0.0, 999.0, 5.0).expect("expected histogram");
        assert_eq!(histogram.bin_count(), 200);
        histogram.inc(-3.0);
        histogram.inc(7.0);
        histogram.inc(5000.0);
        assert_eq!(histogram.bin_value(0), 1);
        assert_eq!(histogram.bin_value(1), 1);
        assert_eq!(histogram.bin_value(199), 1);
        assert_eq!(histogram.bin_sum(), 3);
        assert_eq!(histogram.x_coords()[2], 10.0);
        assert!(Histogram::new(5.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn target_mapping_qc_counts_on_and_near_target_reads() {
        let regions = vec![Interval::new("chr1", 1000, 1009), Interval::new("chr1", 2000, 2009)];
        let mut qc = MappingQc::for_target(&regions, 1).expect("expected target QC");

        let paired = AlignmentFlags {
            paired: true,
            proper_pair: true,
            ..AlignmentFlags::default()
        };
        for _ in 0..20 {
            qc.update(&mapped(1000, "10M").with_flags(paired).with_insert_size(-300));
        }
        qc.update(&mapped(1995, "10M").with_flags(paired).with_insert_size(2000));
        qc.update(&mapped(1200, "5S5M").with_flags(paired).with_insert_size(250));
        qc.update(&mapped(5000, "10M").with_flags(AlignmentFlags {
            duplicate: true,
            ..paired
        }));
        qc.update(&mapped(1000, "10M").with_flags(AlignmentFlags {
            unmapped: true,
            ..AlignmentFlags::default()
        }));
        qc.update(&mapped(1000, "10M").with_flags(AlignmentFlags {
            secondary: true,
            ..paired
        }));

        let result = qc.result();
        assert_eq!(text(&result, "mapped read percentage"), "95.83");
        assert_eq!(text(&result, "on-target read percentage"), "87.50");
        assert_eq!(text(&result, "near-target read percentage"), "91.67");
        assert_eq!(text(&result, "duplicate read percentage"), "4.17");
        assert_eq!(text(&result, "clipped base percentage"), "2.17");
        assert_eq!(text(&result, "properly-paired read percentage"), "95.83");
        // 20 full reads on region 1 plus 5 bases on region 2
        assert_eq!(text(&result, "target region read depth"), "10.25");
        assert_eq!(text(&result, "target region 10x percentage"), "50.00");
        assert_eq!(text(&result, "target region 20x percentage"), "50.00");
        assert_eq!(text(&result, "target region 30x percentage"), "0.00");
        // half depth is 5, reached by region 1 only
        assert_eq!(text(&result, "target region half depth percentage"), "50.00");
        let expected_insert = (20.0 * 300.0 + 999.0 + 250.0) / 23.0;
        assert_eq!(
            text(&result, "insert size"),
            format!("{expected_insert:.2}")
        );
        assert_eq!(qc.insert_size_histogram().bin_sum(), 23);
    }

    #[test]
    fn gc_dropout_compares_target_and_read_bins() {
        let regions = vec![Interval::new("chr1", 1, 100), Interval::new("chr1", 201, 300)];
        let mut qc = MappingQc::for_target(&regions, 1)
            .expect("expected target QC")
            .with_gc_reference(|region: &Interval| {
                Ok(if region.start == 1 {
                    b"A".repeat(100)
                } else {
                    b"GGGCCCAAAT".repeat(10)
                })
            })
            .expect("expected GC bins");
        for _ in 0..10 {
            qc.update(&mapped(11, "50M"));
        }

        // target: half the chunks at 0% GC, half at 60%; reads: all at 0%
        let result = qc.result();
        assert_eq!(text(&result, "AT dropout"), "0.00");
        assert_eq!(text(&result, "GC dropout"), "50.00");

        let whole_genome = MappingQc::whole_genome(1000, 1);
        assert!(whole_genome.with_gc_reference(|_: &Interval| Ok(Vec::new())).is_err());
        assert!(super::gc_content(b"NNNN").is_nan());
        assert_eq!(super::gc_content(b"acgN"), 2.0 / 3.0);
    }

    #[test]
    fn fasta_fetcher_reads_one_based_intervals() {
        let dir = tempfile::tempdir().expect("expected temp dir");
        let path = dir.path().join("ref.fa");
        std::fs::write(&path, ">chr1\nAAAAACCCCCGGGGGTTTTT\n").expect("expected FASTA write");
        std::fs::write(dir.path().join("ref.fa.fai"), "chr1\t20\t6\t20\t21\n")
            .expect("expected index write");

        let mut fetch = super::fasta_fetcher(&path).expect("expected indexed FASTA");
        let bases = fetch(&Interval::new("chr1", 5, 7)).expect("expected bases");
        assert_eq!(bases, b"ACC".to_vec());
        assert!(fetch(&Interval::new("chr9", 1, 5)).is_err());
    }

    #[test]
    fn unmerged_target_is_rejected() {
        let regions = vec![Interval::new("chr1", 1, 10), Interval::new("chr1", 5, 20)];
        assert!(MappingQc::for_target(&regions, 1).is_err());
    }

    #[test]
    fn whole_genome_usable_bases_use_full_reads() {
        let mut qc = MappingQc::whole_genome(1000, 1);
        qc.update(&mapped(1, "100M"));
        qc.update(&mapped(1, "100M").with_mapq(0));
        let mut special = mapped(1, "100M");
        special.chromosome = "chrUn_gl000220".into();
        qc.update(&special);

        let result = qc.result();
        assert_eq!(text(&result, "target region read depth"), "0.10");
        assert_eq!(text(&result, "on-target read percentage"), "66.67");
        assert_eq!(text(&result, "bases usable (MB)"), "0.00");
    }

    #[test]
    fn trimmed_bases_use_first_seen_maximum() {
        let mut qc = MappingQc::whole_genome(1000, 1);
        qc.update(&mapped(1, "100M"));
        qc.update(&mapped(1, "80M"));
        let result = qc.result();
        assert_eq!(text(&result, "trimmed base percentage"), "10.00");
    }

    #[test]
    fn read_qc_tracks_quality_and_composition() {
        let mut qc = ReadQc::new(false);
        qc.update_read(b"ACGT", &[30, 30, 30, 30], ReadDirection::Forward);
        qc.update_read(b"GGNN", &[10, 10, 2, 2], ReadDirection::Reverse);
        qc.update_read(b"ACG", &[40, 40, 40], ReadDirection::Forward);

        let result = qc.result();
        assert_eq!(text(&result, "read count"), "3");
        assert_eq!(text(&result, "read length"), "3, 4");
        assert_eq!(text(&result, "Q20 read percentage"), "66.67");
        assert_eq!(text(&result, "Q30 base percentage"), "63.64");
        assert_eq!(text(&result, "no base call percentage"), "18.18");
        assert_eq!(text(&result, "gc content percentage"), "66.67");
        assert!(result.get("N50").is_none());

        let composition = qc.base_composition();
        assert_eq!(composition.len(), 4);
        assert_eq!(composition[3], [0.0, 0.0, 0.0, 100.0, 50.0]);

        let (forward, reverse) = qc.cycle_qualities();
        assert_eq!(forward.len(), 4);
        assert!((forward[0] - 70.0 / 1.5).abs() < 1e-9);
        assert!((reverse[0] - 10.0 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn long_read_metrics() {
        let mut qc = ReadQc::new(true);
        for (length, quality) in [(1000, 20), (500, 10), (300, 10), (100, 30)] {
            qc.update_read(&vec![b'A'; length], &vec![quality; length], ReadDirection::Forward);
        }
        assert_eq!(qc.nx(0.5), 1000);
        assert_eq!(qc.nx(0.95), 100);

        let result = qc.result();
        assert_eq!(text(&result, "N50"), "1000");
        assert_eq!(text(&result, "N95"), "100");
        assert_eq!(text(&result, "Q score mode"), "10");
        assert_eq!(text(&result, "Q score median"), "15.00");
    }

    #[test]
    fn tsv_output_has_header_and_rows() {
        let mut qc = ReadQc::new(false);
        qc.update_read(b"AC", &[30, 30], ReadDirection::Forward);
        let mut output = Vec::new();
        qc.result().write_tsv(&mut output).expect("expected TSV");
        let text = String::from_utf8(output).expect("expected utf8");
        assert!(text.starts_with("accession\tname\tvalue\nQC:2000005\tread count\t1\n"));
    }

    #[test]
    fn fastq_inputs_are_read_with_their_direction() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let dir = tempfile::tempdir().expect("expected temp dir");
        let forward = dir.path().join("reads_R1.fastq");
        std::fs::write(&forward, "@r1\nACGT\n+\nIIII\n@r2\nNNGG\n+\n!!!!\n")
            .expect("expected FASTQ write");
        let reverse = dir.path().join("reads_R2.fastq.gz");
        let mut encoder = GzEncoder::new(
            std::fs::File::create(&reverse).expect("expected gzip file"),
            Compression::default(),
        );
        encoder
            .write_all(b"@r1\nTTTT\n+\n5555\n")
            .expect("expected gzip write");
        encoder.finish().expect("expected gzip finish");

        let result = read_qc_from_fastq(
            &[
                (forward.as_path(), ReadDirection::Forward),
                (reverse.as_path(), ReadDirection::Reverse),
            ],
            false,
        )
        .expect("expected read QC");
        assert_eq!(text(&result, "read count"), "3");
        assert_eq!(text(&result, "read length"), "4");
        // 'I' is Q40, '5' is Q20, '!' is Q0
        assert_eq!(text(&result, "Q20 read percentage"), "66.67");
        assert_eq!(text(&result, "Q30 base percentage"), "33.33");
        assert_eq!(text(&result, "no base call percentage"), "16.67");
    }
}
