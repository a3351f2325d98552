use crate::chromosome::Chromosome;
use crate::chunker::split_regions;
use crate::errors::{AppError, Result};
use crate::index::IntervalIndex;
use crate::interval::Interval;
use crate::progress::ChunkProgress;
use crate::source::{AlignmentSource, SourceFactory};
use crate::utils::format_fixed;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvgCoverageParams {
    pub min_mapq: u8,
    pub include_duplicates: bool,
    /// Seek the source once per region instead of one linear pass.
    pub panel_mode: bool,
    pub decimals: usize,
}

impl Default for AvgCoverageParams {
    fn default() -> Self {
        Self {
            min_mapq: 1,
            include_duplicates: false,
            panel_mode: false,
            decimals: 2,
        }
    }
}

/// Mean depth of every region, in input order. Regions may overlap and need
/// not be sorted.
pub fn avg_coverage<S: AlignmentSource + ?Sized>(
    regions: &[Interval],
    source: &mut S,
    params: &AvgCoverageParams,
) -> Result<Vec<f64>> {
    check_chromosomes(regions, source)?;
    let totals = if params.panel_mode {
        panel_totals(regions, source, params)?
    } else {
        let mut totals = vec![0u64; regions.len()];
        linear_totals(regions, source, params, &mut totals)?;
        totals
    };
    Ok(mean_depths(regions, &totals))
}

/// Parallel [`avg_coverage`]. Panel mode splits the regions into contiguous
/// chunks; default mode runs one linear pass per chromosome.
pub fn avg_coverage_parallel<F: SourceFactory>(
    regions: &[Interval],
    factory: &F,
    params: &AvgCoverageParams,
    threads: usize,
    progress: bool,
) -> Result<Vec<f64>> {
    check_chromosomes(regions, &factory.open()?)?;

    let tasks: Vec<Vec<usize>> = if params.panel_mode {
        split_regions(regions.len(), threads)
            .into_iter()
            .map(|chunk| chunk.range.collect())
            .filter(|indices: &Vec<usize>| !indices.is_empty())
            .collect()
    } else {
        let mut by_chromosome: BTreeMap<&Chromosome, Vec<usize>> = BTreeMap::new();
        for (index, region) in regions.iter().enumerate() {
            by_chromosome.entry(&region.chromosome).or_default().push(index);
        }
        by_chromosome.into_values().collect()
    };

    let threads = threads.max(1);
    info!(
        regions = regions.len(),
        tasks = tasks.len(),
        threads,
        panel_mode = params.panel_mode,
        "starting average coverage"
    );
    let started = Instant::now();
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|err| AppError::internal(format!("failed to initialize rayon thread pool: {err}")))?;
    let bar = ChunkProgress::new(progress, tasks.len(), "average coverage");

    let results: Vec<Result<Vec<(usize, u64)>>> = pool.install(|| {
        tasks
            .par_iter()
            .map(|indices| {
                let result = run_task(regions, indices, factory, params);
                bar.chunk_done();
                result
            })
            .collect()
    });

    let total = results.len();
    let mut totals = vec![0u64; regions.len()];
    let mut failures = Vec::new();
    for (task, result) in results.into_iter().enumerate() {
        match result {
            Ok(values) => {
                for (index, value) in values {
                    totals[index] = value;
                }
            }
            Err(error) => {
                warn!(task, error = %error, "average coverage task failed");
                failures.push(error.to_string());
            }
        }
    }
    if let Some(first) = failures.first() {
        return Err(AppError::ChunksFailed {
            failed: failures.len(),
            total,
            first: first.clone(),
        });
    }

    bar.finish(format!("done regions={}", regions.len()));
    info!(
        regions = regions.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "average coverage finished"
    );
    Ok(mean_depths(regions, &totals))
}

/// Appends each value, formatted with `decimals` digits, as the last
/// annotation of its region.
pub fn annotate(regions: &mut [Interval], values: &[f64], decimals: usize) -> Result<()> {
    if regions.len() != values.len() {
        return Err(AppError::internal(format!(
            "{} coverage values for {} regions",
            values.len(),
            regions.len()
        )));
    }
    for (region, value) in regions.iter_mut().zip(values) {
        region.annotations.push(format_fixed(*value, decimals));
    }
    Ok(())
}

fn run_task<F: SourceFactory>(
    regions: &[Interval],
    indices: &[usize],
    factory: &F,
    params: &AvgCoverageParams,
) -> Result<Vec<(usize, u64)>> {
    let mut source = factory.open()?;
    let subset = indices
        .iter()
        .map(|index| regions[*index].clone())
        .collect::<Vec<_>>();

    let totals = if params.panel_mode {
        panel_totals(&subset, &mut source, params)?
    } else {
        let mut totals = vec![0u64; subset.len()];
        if let Some(first) = subset.first() {
            debug!(chromosome = %first.chromosome, regions = subset.len(), "scanning chromosome");
            source.set_chromosome(&first.chromosome)?;
            linear_totals(&subset, &mut source, params, &mut totals)?;
        }
        totals
    };
    Ok(indices.iter().copied().zip(totals).collect())
}

fn check_chromosomes<S: AlignmentSource + ?Sized>(regions: &[Interval], source: &S) -> Result<()> {
    match regions
        .iter()
        .find(|region| source.chromosome_length(&region.chromosome).is_none())
    {
        Some(region) => Err(AppError::argument(format!(
            "chromosome '{}' of region {region} not known in alignment file",
            region.chromosome
        ))),
        None => Ok(()),
    }
}

fn panel_totals<S: AlignmentSource + ?Sized>(
    regions: &[Interval],
    source: &mut S,
    params: &AvgCoverageParams,
) -> Result<Vec<u64>> {
    let mut totals = Vec::with_capacity(regions.len());
    for region in regions {
        let mut total = 0u64;
        source.set_region(&region.chromosome, region.start, region.end)?;
        while let Some(record) = source.next_alignment()? {
            if !record.passes_coverage_filter(params.min_mapq, params.include_duplicates) {
                continue;
            }
            total += u64::from(record.overlap(region.start, region.end));
        }
        totals.push(total);
    }
    Ok(totals)
}

fn linear_totals<S: AlignmentSource + ?Sized>(
    regions: &[Interval],
    source: &mut S,
    params: &AvgCoverageParams,
    totals: &mut [u64],
) -> Result<()> {
    let index = IntervalIndex::new(regions);
    while let Some(record) = source.next_alignment()? {
        if !record.passes_coverage_filter(params.min_mapq, params.include_duplicates) {
            continue;
        }
        let end = record.end();
        for region_index in index.matching_indices(&record.chromosome, record.start, end) {
            let region = &regions[region_index];
            totals[region_index] += u64::from(record.overlap(region.start, region.end));
        }
    }
    Ok(())
}

fn mean_depths(regions: &[Interval], totals: &[u64]) -> Vec<f64> {
    regions
        .iter()
        .zip(totals)
        .map(|(region, total)| *total as f64 / f64::from(region.length()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{AvgCoverageParams, annotate, avg_coverage, avg_coverage_parallel};
    use crate::chromosome::Chromosome;
    use crate::cigar::Cigar;
    use crate::errors::AppError;
    use crate::interval::Interval;
    use crate::record::{AlignmentFlags, AlignmentRecord};
    use crate::source::InMemorySourceFactory;

    fn read(chromosome: &str, start: u32, cigar: &str) -> AlignmentRecord {
        AlignmentRecord::new(chromosome, start, Cigar::parse(cigar).expect("expected valid CIGAR"))
    }

    fn fixture() -> InMemorySourceFactory {
        let duplicate = AlignmentFlags {
            duplicate: true,
            ..AlignmentFlags::default()
        };
        InMemorySourceFactory::new(
            vec![(Chromosome::new("chr1"), 1000), (Chromosome::new("chr2"), 1000)],
            vec![
                read("chr1", 95, "10M"),
                read("chr1", 100, "20M"),
                read("chr1", 105, "3M2D5M"),
                read("chr1", 100, "10M").with_mapq(0),
                read("chr1", 100, "10M").with_flags(duplicate),
                read("chr2", 50, "5S10M"),
                read("chr2", 500, "100M"),
            ],
        )
    }

    fn regions() -> Vec<Interval> {
        vec![
            Interval::new("chr2", 55, 64),
            Interval::new("chr1", 100, 109),
            Interval::new("chr1", 105, 114),
            Interval::new("chr1", 300, 301),
        ]
    }

    #[test]
    fn panel_and_default_modes_agree() {
        let factory = fixture();
        let default = avg_coverage(&regions(), &mut factory.source(), &AvgCoverageParams::default())
            .expect("expected default mode");
        let panel = avg_coverage(
            &regions(),
            &mut factory.source(),
            &AvgCoverageParams {
                panel_mode: true,
                ..AvgCoverageParams::default()
            },
        )
        .expect("expected panel mode");
        assert_eq!(default, panel);
        // chr1:100-109 gets 5 + 10 + 5 bases
        assert_eq!(default, vec![0.5, 2.0, 2.0, 0.0]);
    }

    #[test]
    fn duplicates_can_be_included() {
        let factory = fixture();
        let params = AvgCoverageParams {
            include_duplicates: true,
            ..AvgCoverageParams::default()
        };
        let values =
            avg_coverage(&regions(), &mut factory.source(), &params).expect("expected values");
        assert_eq!(values[1], 3.0);
    }

    #[test]
    fn parallel_result_does_not_depend_on_thread_count() {
        let factory = fixture();
        let expected = avg_coverage(&regions(), &mut factory.source(), &AvgCoverageParams::default())
            .expect("expected sequential values");
        for panel_mode in [false, true] {
            let params = AvgCoverageParams {
                panel_mode,
                ..AvgCoverageParams::default()
            };
            for threads in [1, 2, 3, 8] {
                let values = avg_coverage_parallel(&regions(), &factory, &params, threads, false)
                    .expect("expected parallel values");
                assert_eq!(values, expected);
            }
        }
    }

    #[test]
    fn unknown_chromosome_is_rejected_in_both_modes() {
        let factory = fixture();
        let regions = vec![Interval::new("chr7", 1, 10)];
        for panel_mode in [false, true] {
            let params = AvgCoverageParams {
                panel_mode,
                ..AvgCoverageParams::default()
            };
            let error = avg_coverage(&regions, &mut factory.source(), &params)
                .expect_err("expected unknown chromosome");
            assert!(matches!(error, AppError::Argument { .. }));
        }
    }

    #[test]
    fn annotate_appends_formatted_values() {
        let mut regions = vec![
            Interval::new("chr1", 1, 3).with_annotations(vec!["GENE".to_string()]),
            Interval::new("chr1", 5, 6),
        ];
        annotate(&mut regions, &[2.0 / 3.0, 10.0], 3).expect("expected annotation");
        assert_eq!(regions[0].annotations, vec!["GENE".to_string(), "0.667".to_string()]);
        assert_eq!(regions[1].annotations, vec!["10.000".to_string()]);
        assert!(annotate(&mut regions, &[1.0], 2).is_err());
    }
}
