use crate::chunker::{Chunk, ChunkKind, split_chromosomes, split_regions};
use crate::errors::{AppError, Result};
use crate::interval::{self, Interval, is_merged_and_sorted};
use crate::progress::ChunkProgress;
use crate::runs::Threshold;
use crate::source::{AlignmentSource, SourceFactory};
use crate::worker::{run_chromosome_chunk, run_region_chunk};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::time::Instant;
use tracing::{info, warn};

pub use crate::worker::CoverageParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Near-equal chunks of target regions, one region query per interval.
    PerRegion,
    /// One chunk per chromosome with a chromosome-wide byte counter.
    PerChromosome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub threads: usize,
    pub strategy: ScanStrategy,
    pub progress: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            strategy: ScanStrategy::PerRegion,
            progress: false,
        }
    }
}

/// Intervals of `intervals` below `cutoff` depth.
pub fn low_coverage<F: SourceFactory>(
    intervals: &[Interval],
    factory: &F,
    cutoff: u32,
    params: &CoverageParams,
    options: &ScanOptions,
) -> Result<Vec<Interval>> {
    scan_coverage(intervals, factory, Threshold::Below(cutoff), params, options)
}

/// Intervals of `intervals` with at least `cutoff` depth.
pub fn high_coverage<F: SourceFactory>(
    intervals: &[Interval],
    factory: &F,
    cutoff: u32,
    params: &CoverageParams,
    options: &ScanOptions,
) -> Result<Vec<Interval>> {
    scan_coverage(intervals, factory, Threshold::AtLeast(cutoff), params, options)
}

/// Whole-genome low-coverage scan over all non-special chromosomes.
pub fn low_coverage_genome<F: SourceFactory>(
    factory: &F,
    cutoff: u32,
    params: &CoverageParams,
    options: &ScanOptions,
) -> Result<Vec<Interval>> {
    scan_genome(factory, Threshold::Below(cutoff), params, options)
}

/// Whole-genome high-coverage scan over all non-special chromosomes.
pub fn high_coverage_genome<F: SourceFactory>(
    factory: &F,
    cutoff: u32,
    params: &CoverageParams,
    options: &ScanOptions,
) -> Result<Vec<Interval>> {
    scan_genome(factory, Threshold::AtLeast(cutoff), params, options)
}

/// One interval `chr:1-length` per non-special chromosome, in chromosome
/// order.
pub fn genome_intervals<S: AlignmentSource + ?Sized>(source: &S) -> Vec<Interval> {
    let mut intervals = source
        .chromosomes()
        .into_iter()
        .filter(|(chromosome, length)| chromosome.is_non_special() && *length > 0)
        .map(|(chromosome, length)| Interval::new(chromosome, 1, length))
        .collect::<Vec<_>>();
    interval::sort(&mut intervals);
    intervals
}

/// Scans every non-special chromosome of the source header with the
/// chromosome strategy.
pub fn scan_genome<F: SourceFactory>(
    factory: &F,
    threshold: Threshold,
    params: &CoverageParams,
    options: &ScanOptions,
) -> Result<Vec<Interval>> {
    let intervals = genome_intervals(&factory.open()?);
    let options = ScanOptions {
        strategy: ScanStrategy::PerChromosome,
        ..*options
    };
    scan_coverage(&intervals, factory, threshold, params, &options)
}

/// Validates the input, splits it into chunks, runs the workers on a
/// dedicated pool and concatenates their outputs in input order.
///
/// Fails as a whole if any chunk failed; partial results are discarded.
pub fn scan_coverage<F: SourceFactory>(
    intervals: &[Interval],
    factory: &F,
    threshold: Threshold,
    params: &CoverageParams,
    options: &ScanOptions,
) -> Result<Vec<Interval>> {
    if !is_merged_and_sorted(intervals) {
        return Err(AppError::argument(
            "Merged and sorted BED file required for coverage scanning!",
        ));
    }
    if options.strategy == ScanStrategy::PerChromosome && threshold.cutoff() > 255 {
        return Err(AppError::argument("Cutoff cannot be bigger than 255!"));
    }

    let mut chunks = match options.strategy {
        ScanStrategy::PerRegion => split_regions(intervals.len(), options.threads),
        ScanStrategy::PerChromosome => split_chromosomes(intervals),
    };
    let threads = options.threads.max(1);
    info!(
        intervals = intervals.len(),
        chunks = chunks.len(),
        threads,
        strategy = ?options.strategy,
        threshold = ?threshold,
        "starting coverage scan"
    );

    let started = Instant::now();
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|err| AppError::internal(format!("failed to initialize rayon thread pool: {err}")))?;
    let progress = ChunkProgress::new(options.progress, chunks.len(), "coverage scan");

    pool.install(|| {
        chunks.par_iter_mut().for_each(|chunk| {
            if chunk.kind == ChunkKind::Regions {
                run_region_chunk(chunk, intervals, factory, threshold, params);
            } else {
                run_chromosome_chunk(chunk, intervals, factory, threshold, params);
            }
            progress.chunk_done();
        });
    });

    let output = collect_chunks(chunks)?;
    progress.finish(format!("done intervals={}", output.len()));
    info!(
        intervals = output.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "coverage scan finished"
    );
    Ok(output)
}

/// Concatenates chunk outputs by chunk index, or reports the failed chunks.
pub fn collect_chunks(mut chunks: Vec<Chunk>) -> Result<Vec<Interval>> {
    chunks.sort_by_key(|chunk| chunk.index);

    let total = chunks.len();
    let failures = chunks
        .iter()
        .filter_map(|chunk| chunk.error.as_deref().map(|error| (chunk.index, error)))
        .collect::<Vec<_>>();
    if let Some((first_index, first)) = failures.first() {
        for (index, error) in &failures {
            warn!(chunk = index, error = %error, "chunk failed");
        }
        warn!(failed = failures.len(), total, first_chunk = first_index, "coverage scan failed");
        return Err(AppError::ChunksFailed {
            failed: failures.len(),
            total,
            first: (*first).to_string(),
        });
    }

    Ok(chunks.into_iter().flat_map(|chunk| chunk.output).collect())
}
