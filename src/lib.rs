pub mod avg_depth;
pub mod bed;
pub mod chromosome;
pub mod chunker;
pub mod cigar;
pub mod cli;
pub mod coverage;
pub mod errors;
pub mod extract;
pub mod index;
pub mod interval;
pub mod pileup;
pub mod progress;
pub mod qc;
pub mod record;
pub mod runs;
pub mod scan;
pub mod source;
pub mod stats;
pub mod utils;
pub mod worker;
pub mod writer;

use avg_depth::{AvgCoverageParams, annotate, avg_coverage_parallel};
use bed::load_bed;
use cli::{AvgCoverageArgs, Command, CoverageArgs, MappingQcArgs, PileupArgs, ReadQcArgs};
use errors::Result;
use pileup::{PileupParams, pileups};
use qc::{ReadDirection, mapping_qc, read_qc_from_fastq, read_qc_from_source};
use runs::Threshold;
use scan::{CoverageParams, ScanOptions, scan_coverage, scan_genome};
use source::{HtsSource, HtsSourceFactory};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;
use writer::{with_output_writer, write_intervals};

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

pub fn run_from_args(command: Command) -> Result<()> {
    match command {
        Command::LowCoverage(args) => run_coverage(&args, Threshold::Below(args.cutoff)),
        Command::HighCoverage(args) => run_coverage(&args, Threshold::AtLeast(args.cutoff)),
        Command::AvgCoverage(args) => run_avg_coverage(&args),
        Command::MappingQc(args) => run_mapping_qc(&args),
        Command::ReadQc(args) => run_read_qc(&args),
        Command::Pileup(args) => run_pileup(&args),
    }
}

fn reference_path(reference: &Option<String>) -> Option<PathBuf> {
    reference.as_deref().map(PathBuf::from)
}

fn run_coverage(args: &CoverageArgs, threshold: Threshold) -> Result<()> {
    let factory = HtsSourceFactory::new(&args.bam, reference_path(&args.reference));
    let params = CoverageParams {
        min_mapq: args.min_mapq,
        min_baseq: args.min_baseq,
        ..CoverageParams::default()
    };
    let options = ScanOptions {
        threads: args.threads,
        strategy: args.strategy,
        progress: args.progress,
    };

    let output = match &args.roi {
        Some(roi) => {
            let intervals = load_bed(Path::new(roi))?;
            scan_coverage(&intervals, &factory, threshold, &params, &options)?
        }
        None => scan_genome(&factory, threshold, &params, &options)?,
    };
    write_intervals(&args.out, &output)
}

fn run_avg_coverage(args: &AvgCoverageArgs) -> Result<()> {
    let factory = HtsSourceFactory::new(&args.bam, reference_path(&args.reference));
    let params = AvgCoverageParams {
        min_mapq: args.min_mapq,
        include_duplicates: args.include_duplicates,
        panel_mode: args.panel_mode,
        decimals: args.decimals,
    };
    let mut regions = load_bed(Path::new(&args.roi))?;
    let values = avg_coverage_parallel(&regions, &factory, &params, args.threads, args.progress)?;
    annotate(&mut regions, &values, params.decimals)?;
    write_intervals(&args.out, &regions)
}

fn run_mapping_qc(args: &MappingQcArgs) -> Result<()> {
    let reference = reference_path(&args.reference);
    let mut source = HtsSource::open(Path::new(&args.bam), reference.as_deref())?;
    let target = match &args.roi {
        Some(roi) => {
            let mut regions = load_bed(Path::new(roi))?;
            interval::sort(&mut regions);
            let merged = interval::merge(regions, true);
            info!(regions = merged.len(), bases = interval::base_count(&merged), "target region loaded");
            Some(merged)
        }
        None => None,
    };
    let result = mapping_qc(&mut source, target.as_deref(), args.min_mapq, reference.as_deref())?;
    with_output_writer(&args.out, |out| result.write_tsv(out))
}

fn run_read_qc(args: &ReadQcArgs) -> Result<()> {
    let result = match (&args.fastq1, &args.bam) {
        (Some(forward), _) => {
            let mut inputs = vec![(Path::new(forward.as_str()), ReadDirection::Forward)];
            if let Some(reverse) = &args.fastq2 {
                inputs.push((Path::new(reverse.as_str()), ReadDirection::Reverse));
            }
            read_qc_from_fastq(&inputs, args.long_read)?
        }
        (None, Some(bam)) => {
            let mut source =
                HtsSource::open(Path::new(bam), reference_path(&args.reference).as_deref())?;
            read_qc_from_source(&mut source, args.long_read)?
        }
        (None, None) => {
            return Err(errors::AppError::MissingRequired {
                field: "--fastq1 or --bam".to_string(),
            });
        }
    };
    with_output_writer(&args.out, |out| result.write_tsv(out))
}

fn run_pileup(args: &PileupArgs) -> Result<()> {
    let mut source = HtsSource::open(Path::new(&args.bam), reference_path(&args.reference).as_deref())?;
    let params = PileupParams {
        indel_window: args.indel_window,
        min_mapq: args.min_mapq,
        min_baseq: args.min_baseq,
        include_improper_pairs: args.include_improper_pairs,
    };
    let columns = pileups(&mut source, &args.chromosome, args.start, args.end, &params)?;

    with_output_writer(&args.out, |out| {
        out.write_all(b"chr\tpos\tA\tC\tG\tT\tN\tdel\tdepth\tmapq0_frac\tindels\n")?;
        for (pos, column) in (args.start..=args.end).zip(&columns) {
            let indels = column
                .indels()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            writeln!(
                out,
                "{}\t{pos}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                args.chromosome,
                column.count_of(b'A'),
                column.count_of(b'C'),
                column.count_of(b'G'),
                column.count_of(b'T'),
                column.count_of(b'N'),
                column.count_of(b'-'),
                column.depth(false, false),
                utils::format_fixed(column.mapq0_frac(), 4),
                if indels.is_empty() { "." } else { indels.as_str() },
            )?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use crate::cli::parse_args;
    use crate::errors::AppError;

    #[test]
    fn missing_alignment_file_is_reported_as_file_access_error() {
        let dir = tempfile::tempdir().expect("expected temp dir");
        let bam = dir.path().join("missing.bam");
        let out = dir.path().join("qc.tsv");
        let command = parse_args([
            "ngscov",
            "mapping-qc",
            "--bam",
            bam.to_str().expect("expected utf8 path"),
            "--wgs",
            "--out",
            out.to_str().expect("expected utf8 path"),
        ])
        .expect("expected valid args");
        let error = crate::run_from_args(command).expect_err("expected missing file");
        assert!(matches!(error, AppError::FileAccess { .. }));
        assert!(!out.exists());
    }
}
