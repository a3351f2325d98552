use crate::chunker::{Chunk, ChunkKind};
use crate::coverage::{ChromosomeCoverage, RegionCoverage};
use crate::errors::{AppError, Result};
use crate::index::IntervalIndex;
use crate::interval::Interval;
use crate::runs::{Threshold, threshold_runs};
use crate::source::{AlignmentSource, SourceFactory};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::debug;

/// Read filters shared by both coverage workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageParams {
    pub min_mapq: u8,
    /// Bases below this quality are not counted. 0 disables the check.
    pub min_baseq: u8,
    /// Extra bases added on both sides of each region query.
    pub seek_padding: u32,
}

impl Default for CoverageParams {
    fn default() -> Self {
        Self {
            min_mapq: 1,
            min_baseq: 0,
            seek_padding: 0,
        }
    }
}

/// Scans the chunk's intervals one by one with region queries, filling one
/// coverage array per interval.
pub fn run_region_chunk<F: SourceFactory>(
    chunk: &mut Chunk,
    intervals: &[Interval],
    factory: &F,
    threshold: Threshold,
    params: &CoverageParams,
) {
    guarded(chunk, |chunk, output| {
        let slice = chunk_slice(chunk, intervals)?;
        let mut source = factory.open()?;
        let mut mask = Vec::new();

        for interval in slice {
            let mut coverage = RegionCoverage::new(interval.start, interval.end);
            source.set_region(
                &interval.chromosome,
                interval.start.saturating_sub(params.seek_padding).max(1),
                interval.end.saturating_add(params.seek_padding),
            )?;

            while let Some(record) = source.next_alignment()? {
                if !record.passes_coverage_filter(params.min_mapq, false) {
                    continue;
                }
                if params.min_baseq > 0 {
                    record.quality_mask(params.min_baseq, &mut mask);
                    coverage.add_span(record.start, record.end(), Some(&mask));
                } else {
                    coverage.add_span(record.start, record.end(), None);
                }
            }

            emit_runs(output, interval, coverage.values(), coverage.offset(), threshold);
        }
        Ok(())
    });
}

/// Scans the chunk's chromosome once into a saturating byte array, then
/// extracts runs for every interval of the chunk from that array.
pub fn run_chromosome_chunk<F: SourceFactory>(
    chunk: &mut Chunk,
    intervals: &[Interval],
    factory: &F,
    threshold: Threshold,
    params: &CoverageParams,
) {
    guarded(chunk, |chunk, output| {
        let ChunkKind::Chromosome(chromosome) = &chunk.kind else {
            return Err(AppError::argument(format!(
                "chunk {} is not a chromosome chunk",
                chunk.index
            )));
        };
        if threshold.cutoff() > 255 {
            return Err(AppError::argument("Cutoff cannot be bigger than 255!"));
        }
        let slice = chunk_slice(chunk, intervals)?;
        if let Some(foreign) = slice
            .iter()
            .find(|interval| interval.chromosome != *chromosome)
        {
            return Err(AppError::argument(format!(
                "interval {foreign} does not belong to chromosome chunk {chromosome}"
            )));
        }
        let index = IntervalIndex::new(slice);

        let mut source = factory.open()?;
        let length = source.chromosome_length(chromosome).ok_or_else(|| {
            AppError::argument(format!(
                "chromosome '{chromosome}' not known in alignment file"
            ))
        })?;
        debug!(chromosome = %chromosome, length, intervals = slice.len(), "scanning chromosome");

        let mut coverage = ChromosomeCoverage::new(length);
        let mut mask = Vec::new();
        source.set_chromosome(chromosome)?;
        while let Some(record) = source.next_alignment()? {
            if !record.passes_coverage_filter(params.min_mapq, false) {
                continue;
            }
            if !index.overlaps(chromosome, record.start, record.end()) {
                continue;
            }
            if params.min_baseq > 0 {
                record.quality_mask(params.min_baseq, &mut mask);
                coverage.add_span(record.start, record.end(), Some(&mask));
            } else {
                coverage.add_span(record.start, record.end(), None);
            }
        }

        for interval in slice {
            let first = interval.start.max(1);
            let values = coverage.slice(first, interval.end);
            let span = interval.end.saturating_sub(first) as usize + 1;
            if values.len() < span {
                // positions past the chromosome end have depth 0
                let mut padded = values.to_vec();
                padded.resize(span, 0);
                emit_runs(output, interval, padded.as_slice(), first, threshold);
            } else {
                emit_runs(output, interval, values, first, threshold);
            }
        }
        Ok(())
    });
}

fn chunk_slice<'a>(chunk: &Chunk, intervals: &'a [Interval]) -> Result<&'a [Interval]> {
    if chunk.range.start > chunk.range.end {
        return Err(AppError::argument(format!(
            "chunk start index {} is after chunk end index {}",
            chunk.range.start, chunk.range.end
        )));
    }
    intervals.get(chunk.range.clone()).ok_or_else(|| {
        AppError::argument(format!(
            "chunk end index {} is behind data end {}",
            chunk.range.end,
            intervals.len()
        ))
    })
}

fn emit_runs<T: Copy + Into<u32>>(
    output: &mut Vec<Interval>,
    interval: &Interval,
    values: &[T],
    offset: u32,
    threshold: Threshold,
) {
    for (start, end) in threshold_runs(values, offset, threshold) {
        output.push(Interval {
            chromosome: interval.chromosome.clone(),
            start,
            end,
            annotations: interval.annotations.clone(),
        });
    }
}

/// Runs a worker body so that neither errors nor panics leave the worker.
/// Failures land in `chunk.error` and discard partial output.
fn guarded<B>(chunk: &mut Chunk, body: B)
where
    B: FnOnce(&Chunk, &mut Vec<Interval>) -> Result<()>,
{
    let started = Instant::now();
    debug!(
        chunk = chunk.index,
        start = chunk.range.start,
        end = chunk.range.end,
        "processing chunk"
    );

    let mut output = Vec::new();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(chunk, &mut output)));
    match outcome {
        Ok(Ok(())) => chunk.output = output,
        Ok(Err(error)) => chunk.error = Some(error.to_string()),
        Err(payload) => {
            chunk.error = Some(format!(
                "unexpected worker failure: {}",
                panic_message(payload.as_ref())
            ))
        }
    }

    debug!(
        chunk = chunk.index,
        intervals = chunk.output.len(),
        failed = chunk.error.is_some(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "chunk finished"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
