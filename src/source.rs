use crate::chromosome::Chromosome;
use crate::cigar::{Cigar, CigarKind, CigarOp};
use crate::errors::{AppError, Result};
use crate::record::{AlignmentFlags, AlignmentRecord};
use rust_htslib::bam;
use rust_htslib::bam::Read;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Sequential or region-restricted access to alignment records.
///
/// A freshly opened source yields every record of the file in file order.
/// After `set_region` it yields only records overlapping the region.
pub trait AlignmentSource {
    /// Restricts iteration to records overlapping `start..=end` (1-based).
    fn set_region(&mut self, chromosome: &Chromosome, start: u32, end: u32) -> Result<()>;

    fn next_alignment(&mut self) -> Result<Option<AlignmentRecord>>;

    fn chromosome_length(&self, chromosome: &Chromosome) -> Option<u32>;

    /// Reference sequences in header order with their lengths.
    fn chromosomes(&self) -> Vec<(Chromosome, u32)>;

    fn set_chromosome(&mut self, chromosome: &Chromosome) -> Result<()> {
        let length = self.chromosome_length(chromosome).ok_or_else(|| {
            AppError::argument(format!("chromosome '{chromosome}' not known in alignment file"))
        })?;
        self.set_region(chromosome, 1, length.max(1))
    }

    fn genome_size(&self, non_special_only: bool) -> u64 {
        self.chromosomes()
            .iter()
            .filter(|(chromosome, _)| !non_special_only || chromosome.is_non_special())
            .map(|(_, length)| u64::from(*length))
            .sum()
    }
}

/// Opens independent sources, one per worker.
pub trait SourceFactory: Sync {
    type Source: AlignmentSource;

    fn open(&self) -> Result<Self::Source>;
}

#[derive(Debug, Clone)]
pub struct HtsSourceFactory {
    path: PathBuf,
    reference: Option<PathBuf>,
}

impl HtsSourceFactory {
    pub fn new(path: impl Into<PathBuf>, reference: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reference,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceFactory for HtsSourceFactory {
    type Source = HtsSource;

    fn open(&self) -> Result<HtsSource> {
        HtsSource::open(&self.path, self.reference.as_deref())
    }
}

enum HtsReader {
    Sequential(bam::Reader),
    Indexed(bam::IndexedReader),
}

impl HtsReader {
    fn read(&mut self, record: &mut bam::Record) -> Option<rust_htslib::errors::Result<()>> {
        match self {
            Self::Sequential(reader) => reader.read(record),
            Self::Indexed(reader) => reader.read(record),
        }
    }
}

/// BAM/CRAM source backed by rust-htslib.
///
/// Reads sequentially until a region is requested, then switches to an
/// indexed reader for the rest of its lifetime.
pub struct HtsSource {
    path: PathBuf,
    reference: Option<PathBuf>,
    reader: HtsReader,
    targets: Vec<(Chromosome, u32)>,
    tids: HashMap<Chromosome, u32>,
    record: bam::Record,
}

impl HtsSource {
    pub fn open(path: &Path, reference: Option<&Path>) -> Result<Self> {
        let display = path.display().to_string();
        let mut reader =
            bam::Reader::from_path(path).map_err(|err| AppError::file_access(&display, err))?;
        if let Some(reference) = reference {
            reader
                .set_reference(reference)
                .map_err(|err| AppError::file_access(&display, err))?;
        }

        let header = reader.header();
        let mut targets = Vec::with_capacity(header.target_count() as usize);
        let mut tids = HashMap::with_capacity(header.target_count() as usize);
        for tid in 0..header.target_count() {
            let name = String::from_utf8_lossy(header.tid2name(tid)).into_owned();
            let length = header
                .target_len(tid)
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(0);
            let chromosome = Chromosome::new(&name);
            tids.entry(chromosome.clone()).or_insert(tid);
            targets.push((chromosome, length));
        }
        debug!(path = %display, targets = targets.len(), "opened alignment file");

        Ok(Self {
            path: path.to_path_buf(),
            reference: reference.map(Path::to_path_buf),
            reader: HtsReader::Sequential(reader),
            targets,
            tids,
            record: bam::Record::new(),
        })
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    fn indexed_reader(&mut self) -> Result<&mut bam::IndexedReader> {
        if let HtsReader::Sequential(_) = self.reader {
            let display = self.display_path();
            let mut reader = bam::IndexedReader::from_path(&self.path).map_err(|err| {
                AppError::file_access(&display, format!("could not load index: {err}"))
            })?;
            if let Some(reference) = &self.reference {
                reader
                    .set_reference(reference)
                    .map_err(|err| AppError::file_access(&display, err))?;
            }
            self.reader = HtsReader::Indexed(reader);
        }

        match &mut self.reader {
            HtsReader::Indexed(reader) => Ok(reader),
            HtsReader::Sequential(_) => Err(AppError::internal("indexed reader not initialised")),
        }
    }

    fn convert_record(&self) -> Result<AlignmentRecord> {
        let record = &self.record;
        let chromosome = self.chromosome_of(record.tid());
        let mate_chromosome = (record.mtid() >= 0).then(|| self.chromosome_of(record.mtid()));

        let mut ops = Vec::with_capacity(record.cigar_len());
        for op in record.cigar().iter() {
            if let Some(converted) = convert_cigar_op(op) {
                ops.push(converted);
            }
        }

        Ok(AlignmentRecord {
            name: String::from_utf8_lossy(record.qname()).into_owned(),
            chromosome,
            start: one_based(record.pos()),
            mapq: record.mapq(),
            flags: AlignmentFlags::from_bits(record.flags()),
            cigar: Cigar::new(ops),
            bases: record.seq().as_bytes(),
            qualities: record.qual().to_vec(),
            insert_size: record.insert_size(),
            mate_chromosome,
            mate_start: (record.mpos() >= 0).then(|| one_based(record.mpos())),
        })
    }

    fn chromosome_of(&self, tid: i32) -> Chromosome {
        usize::try_from(tid)
            .ok()
            .and_then(|index| self.targets.get(index))
            .map_or_else(|| Chromosome::new("*"), |(chromosome, _)| chromosome.clone())
    }
}

fn one_based(pos: i64) -> u32 {
    u32::try_from(pos.max(0) + 1).unwrap_or(u32::MAX)
}

/// `P` carries no coordinates and is dropped.
fn convert_cigar_op(op: &bam::record::Cigar) -> Option<CigarOp> {
    use bam::record::Cigar as Hts;
    let (kind, len) = match *op {
        Hts::Match(len) | Hts::Equal(len) | Hts::Diff(len) => (CigarKind::Match, len),
        Hts::Ins(len) => (CigarKind::Insertion, len),
        Hts::Del(len) => (CigarKind::Deletion, len),
        Hts::RefSkip(len) => (CigarKind::Skip, len),
        Hts::SoftClip(len) => (CigarKind::SoftClip, len),
        Hts::HardClip(len) => (CigarKind::HardClip, len),
        Hts::Pad(_) => return None,
    };
    Some(CigarOp::new(kind, len))
}

impl AlignmentSource for HtsSource {
    fn set_region(&mut self, chromosome: &Chromosome, start: u32, end: u32) -> Result<()> {
        let display = self.display_path();
        let tid = *self.tids.get(chromosome).ok_or_else(|| {
            AppError::file_access(
                &display,
                format!("could not find chromosome '{chromosome}' in alignment file"),
            )
        })?;
        let start0 = u64::from(start.saturating_sub(1));
        let end0 = u64::from(end);
        let reader = self.indexed_reader()?;
        reader.fetch((tid, start0, end0)).map_err(|err| {
            AppError::file_access(
                &display,
                format!("could not fetch region {chromosome}:{start}-{end}: {err}"),
            )
        })
    }

    fn next_alignment(&mut self) -> Result<Option<AlignmentRecord>> {
        match self.reader.read(&mut self.record) {
            None => Ok(None),
            Some(Ok(())) => self.convert_record().map(Some),
            Some(Err(err)) => Err(AppError::file_access(
                self.display_path(),
                format!("could not read next alignment: {err}"),
            )),
        }
    }

    fn chromosome_length(&self, chromosome: &Chromosome) -> Option<u32> {
        let tid = *self.tids.get(chromosome)?;
        self.targets.get(tid as usize).map(|(_, length)| *length)
    }

    fn chromosomes(&self) -> Vec<(Chromosome, u32)> {
        self.targets.clone()
    }
}

/// Records held in memory, sorted by chromosome and start.
///
/// Behaves like an indexed file: region queries return overlapping records
/// in coordinate order.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    records: Arc<Vec<AlignmentRecord>>,
    targets: Arc<Vec<(Chromosome, u32)>>,
    region: Option<(Chromosome, u32, u32)>,
    cursor: usize,
}

impl AlignmentSource for InMemorySource {
    fn set_region(&mut self, chromosome: &Chromosome, start: u32, end: u32) -> Result<()> {
        if self.chromosome_length(chromosome).is_none() {
            return Err(AppError::file_access(
                "<memory>",
                format!("could not find chromosome '{chromosome}' in alignment file"),
            ));
        }
        self.cursor = self
            .records
            .partition_point(|record| record.chromosome < *chromosome);
        self.region = Some((chromosome.clone(), start, end));
        Ok(())
    }

    fn next_alignment(&mut self) -> Result<Option<AlignmentRecord>> {
        while let Some(record) = self.records.get(self.cursor) {
            self.cursor += 1;
            let Some((chromosome, start, end)) = &self.region else {
                return Ok(Some(record.clone()));
            };
            if record.chromosome != *chromosome || record.start > *end {
                self.cursor = self.records.len();
                return Ok(None);
            }
            if record.end() >= *start {
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }

    fn chromosome_length(&self, chromosome: &Chromosome) -> Option<u32> {
        self.targets
            .iter()
            .find(|(name, _)| name == chromosome)
            .map(|(_, length)| *length)
    }

    fn chromosomes(&self) -> Vec<(Chromosome, u32)> {
        self.targets.as_ref().clone()
    }
}

#[derive(Debug, Clone)]
pub struct InMemorySourceFactory {
    records: Arc<Vec<AlignmentRecord>>,
    targets: Arc<Vec<(Chromosome, u32)>>,
}

impl InMemorySourceFactory {
    pub fn new(targets: Vec<(Chromosome, u32)>, mut records: Vec<AlignmentRecord>) -> Self {
        records.sort_by(|left, right| {
            left.chromosome
                .cmp(&right.chromosome)
                .then(left.start.cmp(&right.start))
        });
        Self {
            records: Arc::new(records),
            targets: Arc::new(targets),
        }
    }

    pub fn source(&self) -> InMemorySource {
        InMemorySource {
            records: Arc::clone(&self.records),
            targets: Arc::clone(&self.targets),
            region: None,
            cursor: 0,
        }
    }
}

impl SourceFactory for InMemorySourceFactory {
    type Source = InMemorySource;

    fn open(&self) -> Result<InMemorySource> {
        Ok(self.source())
    }
}
