use ngs_coverage::avg_depth::{AvgCoverageParams, avg_coverage, avg_coverage_parallel};
use ngs_coverage::chromosome::Chromosome;
use ngs_coverage::cigar::Cigar;
use ngs_coverage::errors::{AppError, Result};
use ngs_coverage::interval::{self, Interval, base_count};
use ngs_coverage::record::{AlignmentFlags, AlignmentRecord};
use ngs_coverage::scan::{
    CoverageParams, ScanOptions, ScanStrategy, genome_intervals, high_coverage, low_coverage,
    low_coverage_genome,
};
use ngs_coverage::source::{AlignmentSource, InMemorySource, InMemorySourceFactory, SourceFactory};

/// Deterministic pseudo-random generator for fixtures.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u32) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) % u64::from(bound)) as u32
    }
}

fn targets() -> Vec<(Chromosome, u32)> {
    vec![
        (Chromosome::new("chr1"), 5000),
        (Chromosome::new("chr2"), 3000),
        (Chromosome::new("chrX"), 2000),
        (Chromosome::new("chrUn_gl000220"), 1000),
    ]
}

fn random_fixture(seed: u64, reads: usize) -> InMemorySourceFactory {
    let cigars = ["50M", "20M5D30M", "10S40M", "30M100N20M", "25M3I25M", "60M"];
    let mut rng = Lcg(seed);
    let targets = targets();
    let mut records = Vec::with_capacity(reads);
    for _ in 0..reads {
        let (chromosome, length) = &targets[rng.next(targets.len() as u32) as usize];
        let cigar = Cigar::parse(cigars[rng.next(cigars.len() as u32) as usize])
            .expect("expected valid CIGAR");
        let start = 1 + rng.next(length - 200);
        let flags = AlignmentFlags {
            duplicate: rng.next(20) == 0,
            secondary: rng.next(30) == 0,
            ..AlignmentFlags::default()
        };
        records.push(
            AlignmentRecord::new(chromosome.clone(), start, cigar)
                .with_mapq(rng.next(61) as u8)
                .with_flags(flags),
        );
    }
    InMemorySourceFactory::new(targets, records)
}

fn regions() -> Vec<Interval> {
    vec![
        Interval::new("chr1", 100, 400).with_annotations(vec!["GENE1".to_string()]),
        Interval::new("chr1", 600, 900),
        Interval::new("chr1", 1500, 1510),
        Interval::new("chr1", 3000, 3400),
        Interval::new("chr2", 50, 700),
        Interval::new("chrX", 10, 1500),
    ]
}

fn options(threads: usize, strategy: ScanStrategy) -> ScanOptions {
    ScanOptions {
        threads,
        strategy,
        progress: false,
    }
}

fn uniform_reads(start: u32, cigar: &str, copies: usize) -> Vec<AlignmentRecord> {
    let cigar = Cigar::parse(cigar).expect("expected valid CIGAR");
    (0..copies)
        .map(|_| AlignmentRecord::new("chr1", start, cigar.clone()))
        .collect()
}

#[test]
fn uniform_depth_is_low_only_above_the_depth() {
    let factory = InMemorySourceFactory::new(targets(), uniform_reads(100, "11M", 25));
    let region = vec![Interval::new("chr1", 100, 110)];
    for strategy in [ScanStrategy::PerRegion, ScanStrategy::PerChromosome] {
        let below = low_coverage(&region, &factory, 20, &CoverageParams::default(), &options(1, strategy))
            .expect("expected scan");
        assert!(below.is_empty());

        let above = low_coverage(&region, &factory, 30, &CoverageParams::default(), &options(1, strategy))
            .expect("expected scan");
        assert_eq!(above, region);
    }
}

#[test]
fn depth_step_splits_the_region() {
    let mut records = uniform_reads(100, "5M", 20);
    records.extend(uniform_reads(100, "11M", 10));
    let factory = InMemorySourceFactory::new(targets(), records);
    let region = vec![Interval::new("chr1", 100, 110)];
    for strategy in [ScanStrategy::PerRegion, ScanStrategy::PerChromosome] {
        let low = low_coverage(&region, &factory, 20, &CoverageParams::default(), &options(2, strategy))
            .expect("expected scan");
        assert_eq!(low, vec![Interval::new("chr1", 105, 110)]);

        let high = high_coverage(&region, &factory, 20, &CoverageParams::default(), &options(2, strategy))
            .expect("expected scan");
        assert_eq!(high, vec![Interval::new("chr1", 100, 104)]);
    }
}

#[test]
fn clip_only_reads_add_no_depth() {
    let mut records = uniform_reads(100, "50S", 5);
    records.extend(uniform_reads(101, "4M", 2));
    let factory = InMemorySourceFactory::new(targets(), records);
    let region = vec![Interval::new("chr1", 100, 100)];
    for strategy in [ScanStrategy::PerRegion, ScanStrategy::PerChromosome] {
        let low = low_coverage(&region, &factory, 1, &CoverageParams::default(), &options(1, strategy))
            .expect("expected scan");
        assert_eq!(low, region);
    }

    let wider = vec![Interval::new("chr1", 100, 103)];
    for panel_mode in [false, true] {
        let params = AvgCoverageParams {
            panel_mode,
            ..AvgCoverageParams::default()
        };
        let values = avg_coverage(&wider, &mut factory.source(), &params).expect("expected averages");
        assert_eq!(values, vec![1.5]);
    }
}

#[test]
fn regions_past_the_chromosome_end_are_low_in_both_strategies() {
    let factory = InMemorySourceFactory::new(targets(), uniform_reads(4990, "11M", 3));
    let region = vec![Interval::new("chr1", 4990, 5010)];
    for strategy in [ScanStrategy::PerRegion, ScanStrategy::PerChromosome] {
        let low = low_coverage(&region, &factory, 1, &CoverageParams::default(), &options(1, strategy))
            .expect("expected scan");
        assert_eq!(low, vec![Interval::new("chr1", 5001, 5010)], "strategy={strategy:?}");
        let high = high_coverage(&region, &factory, 1, &CoverageParams::default(), &options(1, strategy))
            .expect("expected scan");
        assert_eq!(high, vec![Interval::new("chr1", 4990, 5000)], "strategy={strategy:?}");
    }
}

#[test]
fn raising_the_cutoff_is_monotonic() {
    let factory = random_fixture(7, 800);
    let params = CoverageParams::default();
    let options = options(3, ScanStrategy::PerRegion);
    let mut previous_low = 0;
    let mut previous_high = u64::MAX;
    for cutoff in 0..25 {
        let low = low_coverage(&regions(), &factory, cutoff, &params, &options).expect("expected scan");
        let high = high_coverage(&regions(), &factory, cutoff, &params, &options).expect("expected scan");
        let low_bases = base_count(&low);
        let high_bases = base_count(&high);
        assert!(low_bases >= previous_low, "low coverage shrank at cutoff {cutoff}");
        assert!(high_bases <= previous_high, "high coverage grew at cutoff {cutoff}");
        previous_low = low_bases;
        previous_high = high_bases;
    }
}

#[test]
fn low_and_high_coverage_partition_the_regions() {
    let factory = random_fixture(11, 800);
    let params = CoverageParams::default();
    for strategy in [ScanStrategy::PerRegion, ScanStrategy::PerChromosome] {
        for cutoff in [1, 3, 8] {
            let low = low_coverage(&regions(), &factory, cutoff, &params, &options(2, strategy))
                .expect("expected scan");
            let high = high_coverage(&regions(), &factory, cutoff, &params, &options(2, strategy))
                .expect("expected scan");
            assert_eq!(base_count(&low) + base_count(&high), base_count(&regions()));

            let mut union = low.into_iter().chain(high).collect::<Vec<_>>();
            interval::sort(&mut union);
            let union = interval::merge(union, true);
            assert_eq!(union, interval::merge(regions(), true));
        }
    }
}

#[test]
fn output_does_not_depend_on_threads_or_strategy() {
    let factory = random_fixture(23, 1200);
    let params = CoverageParams {
        min_mapq: 10,
        ..CoverageParams::default()
    };
    let expected = low_coverage(&regions(), &factory, 4, &params, &options(1, ScanStrategy::PerRegion))
        .expect("expected reference scan");
    assert!(!expected.is_empty());
    assert_eq!(expected[0].annotations, vec!["GENE1".to_string()]);
    for strategy in [ScanStrategy::PerRegion, ScanStrategy::PerChromosome] {
        for threads in [1, 2, 4, 7, 16] {
            let output = low_coverage(&regions(), &factory, 4, &params, &options(threads, strategy))
                .expect("expected scan");
            assert_eq!(output, expected, "threads={threads} strategy={strategy:?}");
        }
    }
}

#[test]
fn repeated_scans_are_identical() {
    let factory = random_fixture(5, 500);
    let run = || {
        high_coverage(
            &regions(),
            &factory,
            2,
            &CoverageParams::default(),
            &options(4, ScanStrategy::PerChromosome),
        )
        .expect("expected scan")
    };
    assert_eq!(run(), run());
}

#[test]
fn chromosome_counters_saturate_at_254() {
    let factory = InMemorySourceFactory::new(targets(), uniform_reads(10, "10M", 1000));
    let region = vec![Interval::new("chr1", 10, 19)];
    let params = CoverageParams::default();

    let chromosome = options(1, ScanStrategy::PerChromosome);
    let at_254 = high_coverage(&region, &factory, 254, &params, &chromosome).expect("expected scan");
    assert_eq!(at_254, region);
    let at_255 = high_coverage(&region, &factory, 255, &params, &chromosome).expect("expected scan");
    assert!(at_255.is_empty());

    let per_region = options(1, ScanStrategy::PerRegion);
    let exact = high_coverage(&region, &factory, 1000, &params, &per_region).expect("expected scan");
    assert_eq!(exact, region);
}

#[test]
fn genome_scan_covers_non_special_chromosomes() {
    let factory = random_fixture(31, 400);
    let params = CoverageParams::default();
    let genome = low_coverage_genome(&factory, 3, &params, &options(3, ScanStrategy::PerRegion))
        .expect("expected genome scan");
    let explicit = low_coverage(
        &genome_intervals(&factory.open().expect("expected source")),
        &factory,
        3,
        &params,
        &options(1, ScanStrategy::PerChromosome),
    )
    .expect("expected chromosome scan");
    assert_eq!(genome, explicit);
    assert!(genome.iter().all(|interval| interval.chromosome.is_non_special()));
}

#[test]
fn average_depth_modes_and_thread_counts_agree() {
    let factory = random_fixture(41, 900);
    // overlapping and unsorted regions are fine for averaging
    let mut regions = regions();
    regions.push(Interval::new("chr1", 350, 650));
    regions.reverse();

    for include_duplicates in [false, true] {
        let params = AvgCoverageParams {
            include_duplicates,
            ..AvgCoverageParams::default()
        };
        let expected = avg_coverage(&regions, &mut factory.source(), &params)
            .expect("expected sequential averages");
        for panel_mode in [false, true] {
            let params = AvgCoverageParams { panel_mode, ..params };
            assert_eq!(
                avg_coverage(&regions, &mut factory.source(), &params).expect("expected averages"),
                expected
            );
            for threads in [1, 3, 8] {
                let values = avg_coverage_parallel(&regions, &factory, &params, threads, false)
                    .expect("expected parallel averages");
                assert_eq!(values, expected);
            }
        }
    }
}

/// Source whose region queries on one chromosome fail.
struct BrokenSource {
    inner: InMemorySource,
    broken: Chromosome,
}

impl AlignmentSource for BrokenSource {
    fn set_region(&mut self, chromosome: &Chromosome, start: u32, end: u32) -> Result<()> {
        if *chromosome == self.broken {
            return Err(AppError::file_access("broken.bam", "truncated BGZF block"));
        }
        self.inner.set_region(chromosome, start, end)
    }

    fn next_alignment(&mut self) -> Result<Option<AlignmentRecord>> {
        self.inner.next_alignment()
    }

    fn chromosome_length(&self, chromosome: &Chromosome) -> Option<u32> {
        self.inner.chromosome_length(chromosome)
    }

    fn chromosomes(&self) -> Vec<(Chromosome, u32)> {
        self.inner.chromosomes()
    }
}

struct BrokenFactory(InMemorySourceFactory);

impl SourceFactory for BrokenFactory {
    type Source = BrokenSource;

    fn open(&self) -> Result<BrokenSource> {
        Ok(BrokenSource {
            inner: self.0.source(),
            broken: Chromosome::new("chrX"),
        })
    }
}

#[test]
fn one_failing_chunk_fails_the_whole_scan() {
    let factory = BrokenFactory(random_fixture(3, 300));
    for strategy in [ScanStrategy::PerRegion, ScanStrategy::PerChromosome] {
        let error = low_coverage(&regions(), &factory, 5, &CoverageParams::default(), &options(3, strategy))
            .expect_err("expected aggregated failure");
        match error {
            AppError::ChunksFailed { failed, total, first } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
                assert_eq!(first, "file access error for broken.bam: truncated BGZF block");
            }
            other => panic!("expected chunk failure, got {other:?}"),
        }
    }

    let error = avg_coverage_parallel(&regions(), &factory, &AvgCoverageParams::default(), 2, false)
        .expect_err("expected aggregated failure");
    assert!(matches!(error, AppError::ChunksFailed { failed: 1, .. }));
}
