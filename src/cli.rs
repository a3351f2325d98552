use crate::chromosome::Chromosome;
use crate::errors::{AppError, Result};
use crate::scan::ScanStrategy;
use clap::error::ErrorKind;
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "ngscov", disable_version_flag = true)]
struct CliArgs {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommand {
    /// Sub-regions with depth below the cutoff
    LowCoverage(CoverageCli),
    /// Sub-regions with depth at or above the cutoff
    HighCoverage(CoverageCli),
    /// Append the mean depth of every region as a new column
    AvgCoverage(AvgCoverageCli),
    /// Mapping statistics for a target region or the whole genome
    MappingQc(MappingQcCli),
    /// Read statistics from FASTQ or alignment input
    ReadQc(ReadQcCli),
    /// Base and indel counts at a position or range
    Pileup(PileupCli),
}

#[derive(Debug, Clone, Args)]
struct CoverageCli {
    #[arg(long = "bam")]
    bam: Option<String>,
    #[arg(long = "roi")]
    roi: Option<String>,
    #[arg(long = "wgs", action = ArgAction::SetTrue)]
    wgs: bool,
    #[arg(long = "cutoff")]
    cutoff: Option<String>,
    #[arg(long = "min-mapq", default_value = "1")]
    min_mapq: String,
    #[arg(long = "min-baseq", default_value = "0")]
    min_baseq: String,
    #[arg(long = "threads", default_value = "1")]
    threads: String,
    #[arg(long = "strategy", default_value = "region")]
    strategy: String,
    #[arg(long = "ref")]
    reference: Option<String>,
    #[arg(short = 'o', long = "out", default_value = "-")]
    out: String,
    #[arg(long = "progress", action = ArgAction::SetTrue)]
    progress: bool,
}

#[derive(Debug, Clone, Args)]
struct AvgCoverageCli {
    #[arg(long = "bam")]
    bam: Option<String>,
    #[arg(long = "roi")]
    roi: Option<String>,
    #[arg(long = "min-mapq", default_value = "1")]
    min_mapq: String,
    #[arg(long = "include-duplicates", action = ArgAction::SetTrue)]
    include_duplicates: bool,
    #[arg(long = "panel-mode", action = ArgAction::SetTrue)]
    panel_mode: bool,
    #[arg(long = "decimals", default_value = "2")]
    decimals: String,
    #[arg(long = "threads", default_value = "1")]
    threads: String,
    #[arg(long = "ref")]
    reference: Option<String>,
    #[arg(short = 'o', long = "out", default_value = "-")]
    out: String,
    #[arg(long = "progress", action = ArgAction::SetTrue)]
    progress: bool,
}

#[derive(Debug, Clone, Args)]
struct MappingQcCli {
    #[arg(long = "bam")]
    bam: Option<String>,
    #[arg(long = "roi")]
    roi: Option<String>,
    #[arg(long = "wgs", action = ArgAction::SetTrue)]
    wgs: bool,
    #[arg(long = "min-mapq", default_value = "1")]
    min_mapq: String,
    #[arg(long = "ref")]
    reference: Option<String>,
    #[arg(short = 'o', long = "out", default_value = "-")]
    out: String,
}

#[derive(Debug, Clone, Args)]
struct ReadQcCli {
    #[arg(long = "fastq1")]
    fastq1: Option<String>,
    #[arg(long = "fastq2")]
    fastq2: Option<String>,
    #[arg(long = "bam")]
    bam: Option<String>,
    #[arg(long = "long-read", action = ArgAction::SetTrue)]
    long_read: bool,
    #[arg(long = "ref")]
    reference: Option<String>,
    #[arg(short = 'o', long = "out", default_value = "-")]
    out: String,
}

#[derive(Debug, Clone, Args)]
struct PileupCli {
    #[arg(long = "bam")]
    bam: Option<String>,
    #[arg(long = "position")]
    position: Option<String>,
    #[arg(long = "indel-window")]
    indel_window: Option<String>,
    #[arg(long = "min-mapq", default_value = "1")]
    min_mapq: String,
    #[arg(long = "min-baseq", default_value = "0")]
    min_baseq: String,
    #[arg(long = "include-improper-pairs", action = ArgAction::SetTrue)]
    include_improper_pairs: bool,
    #[arg(long = "ref")]
    reference: Option<String>,
    #[arg(short = 'o', long = "out", default_value = "-")]
    out: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LowCoverage(CoverageArgs),
    HighCoverage(CoverageArgs),
    AvgCoverage(AvgCoverageArgs),
    MappingQc(MappingQcArgs),
    ReadQc(ReadQcArgs),
    Pileup(PileupArgs),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageArgs {
    pub bam: String,
    pub roi: Option<String>,
    pub wgs: bool,
    pub cutoff: u32,
    pub min_mapq: u8,
    pub min_baseq: u8,
    pub threads: usize,
    pub strategy: ScanStrategy,
    pub reference: Option<String>,
    pub out: String,
    pub progress: bool,
}

impl Default for CoverageArgs {
    fn default() -> Self {
        Self {
            bam: String::new(),
            roi: None,
            wgs: false,
            cutoff: 20,
            min_mapq: 1,
            min_baseq: 0,
            threads: 1,
            strategy: ScanStrategy::PerRegion,
            reference: None,
            out: "-".to_string(),
            progress: false,
        }
    }
}

impl CoverageArgs {
    pub fn validate(&self) -> Result<()> {
        require("--bam", &self.bam)?;
        exactly_one_target(self.roi.is_some(), self.wgs)?;
        if self.threads == 0 {
            return Err(AppError::InvalidValue {
                flag: "--threads".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let byte_counter = self.wgs || self.strategy == ScanStrategy::PerChromosome;
        if byte_counter && self.cutoff > 255 {
            return Err(AppError::InvalidValue {
                flag: "--cutoff".to_string(),
                value: self.cutoff.to_string(),
                reason: "Cutoff cannot be bigger than 255!".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvgCoverageArgs {
    pub bam: String,
    pub roi: String,
    pub min_mapq: u8,
    pub include_duplicates: bool,
    pub panel_mode: bool,
    pub decimals: usize,
    pub threads: usize,
    pub reference: Option<String>,
    pub out: String,
    pub progress: bool,
}

impl Default for AvgCoverageArgs {
    fn default() -> Self {
        Self {
            bam: String::new(),
            roi: String::new(),
            min_mapq: 1,
            include_duplicates: false,
            panel_mode: false,
            decimals: 2,
            threads: 1,
            reference: None,
            out: "-".to_string(),
            progress: false,
        }
    }
}

impl AvgCoverageArgs {
    pub fn validate(&self) -> Result<()> {
        require("--bam", &self.bam)?;
        require("--roi", &self.roi)?;
        if self.threads == 0 {
            return Err(AppError::InvalidValue {
                flag: "--threads".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingQcArgs {
    pub bam: String,
    pub roi: Option<String>,
    pub wgs: bool,
    pub min_mapq: u8,
    pub reference: Option<String>,
    pub out: String,
}

impl Default for MappingQcArgs {
    fn default() -> Self {
        Self {
            bam: String::new(),
            roi: None,
            wgs: false,
            min_mapq: 1,
            reference: None,
            out: "-".to_string(),
        }
    }
}

impl MappingQcArgs {
    pub fn validate(&self) -> Result<()> {
        require("--bam", &self.bam)?;
        exactly_one_target(self.roi.is_some(), self.wgs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadQcArgs {
    pub fastq1: Option<String>,
    pub fastq2: Option<String>,
    pub bam: Option<String>,
    pub long_read: bool,
    pub reference: Option<String>,
    pub out: String,
}

impl Default for ReadQcArgs {
    fn default() -> Self {
        Self {
            fastq1: None,
            fastq2: None,
            bam: None,
            long_read: false,
            reference: None,
            out: "-".to_string(),
        }
    }
}

impl ReadQcArgs {
    pub fn validate(&self) -> Result<()> {
        match (&self.fastq1, &self.bam) {
            (None, None) => Err(AppError::MissingRequired {
                field: "--fastq1 or --bam".to_string(),
            }),
            (Some(_), Some(_)) => Err(AppError::argument(
                "--fastq1 and --bam cannot be combined",
            )),
            (None, Some(_)) if self.fastq2.is_some() => Err(AppError::argument(
                "--fastq2 requires --fastq1",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PileupArgs {
    pub bam: String,
    pub chromosome: Chromosome,
    pub start: u32,
    pub end: u32,
    pub indel_window: Option<u32>,
    pub min_mapq: u8,
    pub min_baseq: u8,
    pub include_improper_pairs: bool,
    pub reference: Option<String>,
    pub out: String,
}

impl Default for PileupArgs {
    fn default() -> Self {
        Self {
            bam: String::new(),
            chromosome: Chromosome::new(""),
            start: 1,
            end: 1,
            indel_window: None,
            min_mapq: 1,
            min_baseq: 0,
            include_improper_pairs: false,
            reference: None,
            out: "-".to_string(),
        }
    }
}

impl PileupArgs {
    pub fn validate(&self) -> Result<()> {
        require("--bam", &self.bam)?;
        if self.chromosome.as_str().is_empty() {
            return Err(AppError::MissingRequired {
                field: "--position".to_string(),
            });
        }
        if self.start == 0 || self.start > self.end {
            return Err(AppError::InvalidValue {
                flag: "--position".to_string(),
                value: format!("{}:{}-{}", self.chromosome, self.start, self.end),
                reason: "positions are 1-based and start must not exceed end".to_string(),
            });
        }
        Ok(())
    }
}

impl Command {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::LowCoverage(args) | Self::HighCoverage(args) => args.validate(),
            Self::AvgCoverage(args) => args.validate(),
            Self::MappingQc(args) => args.validate(),
            Self::ReadQc(args) => args.validate(),
            Self::Pileup(args) => args.validate(),
        }
    }
}

/// Parses the process arguments. Help output exits the process directly.
pub fn parse_from_env() -> Result<Command> {
    let tokens: Vec<String> = std::env::args().collect();
    match CliArgs::try_parse_from(&tokens) {
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            error.exit()
        }
        _ => parse_args(tokens),
    }
}

pub fn parse_args<I, S>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut tokens: Vec<String> = args.into_iter().map(Into::into).collect();
    if tokens.is_empty() {
        tokens.push("ngscov".to_string());
    }

    let cli = CliArgs::try_parse_from(tokens).map_err(map_clap_error)?;
    let command = match cli.command {
        CliCommand::LowCoverage(raw) => Command::LowCoverage(coverage_args(raw)?),
        CliCommand::HighCoverage(raw) => Command::HighCoverage(coverage_args(raw)?),
        CliCommand::AvgCoverage(raw) => Command::AvgCoverage(AvgCoverageArgs {
            bam: raw.bam.unwrap_or_default(),
            roi: raw.roi.unwrap_or_default(),
            min_mapq: parse_u8("--min-mapq", &raw.min_mapq)?,
            include_duplicates: raw.include_duplicates,
            panel_mode: raw.panel_mode,
            decimals: parse_usize("--decimals", &raw.decimals)?,
            threads: parse_usize("--threads", &raw.threads)?,
            reference: raw.reference,
            out: raw.out,
            progress: raw.progress,
        }),
        CliCommand::MappingQc(raw) => Command::MappingQc(MappingQcArgs {
            bam: raw.bam.unwrap_or_default(),
            roi: raw.roi,
            wgs: raw.wgs,
            min_mapq: parse_u8("--min-mapq", &raw.min_mapq)?,
            reference: raw.reference,
            out: raw.out,
        }),
        CliCommand::ReadQc(raw) => Command::ReadQc(ReadQcArgs {
            fastq1: raw.fastq1,
            fastq2: raw.fastq2,
            bam: raw.bam,
            long_read: raw.long_read,
            reference: raw.reference,
            out: raw.out,
        }),
        CliCommand::Pileup(raw) => {
            let (chromosome, start, end) = match raw.position.as_deref() {
                Some(position) => parse_position(position)?,
                None => {
                    return Err(AppError::MissingRequired {
                        field: "--position".to_string(),
                    });
                }
            };
            Command::Pileup(PileupArgs {
                bam: raw.bam.unwrap_or_default(),
                chromosome,
                start,
                end,
                indel_window: raw
                    .indel_window
                    .as_deref()
                    .map(|value| parse_u32("--indel-window", value))
                    .transpose()?,
                min_mapq: parse_u8("--min-mapq", &raw.min_mapq)?,
                min_baseq: parse_u8("--min-baseq", &raw.min_baseq)?,
                include_improper_pairs: raw.include_improper_pairs,
                reference: raw.reference,
                out: raw.out,
            })
        }
    };

    command.validate()?;
    Ok(command)
}

fn coverage_args(raw: CoverageCli) -> Result<CoverageArgs> {
    let cutoff = raw.cutoff.as_deref().ok_or_else(|| AppError::MissingRequired {
        field: "--cutoff".to_string(),
    })?;
    Ok(CoverageArgs {
        bam: raw.bam.unwrap_or_default(),
        roi: raw.roi,
        wgs: raw.wgs,
        cutoff: parse_u32("--cutoff", cutoff)?,
        min_mapq: parse_u8("--min-mapq", &raw.min_mapq)?,
        min_baseq: parse_u8("--min-baseq", &raw.min_baseq)?,
        threads: parse_usize("--threads", &raw.threads)?,
        strategy: parse_strategy(&raw.strategy)?,
        reference: raw.reference,
        out: raw.out,
        progress: raw.progress,
    })
}

fn require(flag: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AppError::MissingRequired {
            field: flag.to_string(),
        });
    }
    Ok(())
}

fn exactly_one_target(roi: bool, wgs: bool) -> Result<()> {
    match (roi, wgs) {
        (false, false) => Err(AppError::MissingRequired {
            field: "--roi or --wgs".to_string(),
        }),
        (true, true) => Err(AppError::argument("--roi and --wgs cannot be combined")),
        _ => Ok(()),
    }
}

fn parse_strategy(value: &str) -> Result<ScanStrategy> {
    match value {
        "region" => Ok(ScanStrategy::PerRegion),
        "chromosome" => Ok(ScanStrategy::PerChromosome),
        other => Err(AppError::InvalidValue {
            flag: "--strategy".to_string(),
            value: other.to_string(),
            reason: "supported strategies are \"region\" (default) and \"chromosome\"".to_string(),
        }),
    }
}

/// Parses `chr:pos` or `chr:start-end`.
fn parse_position(value: &str) -> Result<(Chromosome, u32, u32)> {
    let invalid = |reason: &str| AppError::InvalidValue {
        flag: "--position".to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let (chromosome, range) = value
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected chr:pos or chr:start-end"))?;
    if chromosome.is_empty() {
        return Err(invalid("missing chromosome"));
    }
    let range = range.replace(',', "");
    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (start, end),
        None => (range.as_str(), range.as_str()),
    };
    let start = start
        .parse::<u32>()
        .map_err(|_| invalid("start must be a positive integer"))?;
    let end = end
        .parse::<u32>()
        .map_err(|_| invalid("end must be a positive integer"))?;
    Ok((Chromosome::new(chromosome), start, end))
}

fn map_clap_error(error: clap::Error) -> AppError {
    let kind = error.kind();
    let rendered = error.to_string();
    match kind {
        ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand => AppError::UnsupportedArgument {
            arg: first_quoted_token(&rendered).unwrap_or(rendered),
        },
        ErrorKind::TooFewValues | ErrorKind::WrongNumberOfValues | ErrorKind::InvalidValue => {
            AppError::MissingValue {
                flag: first_quoted_token(&rendered).unwrap_or_else(|| "argument".to_string()),
            }
        }
        _ => AppError::ParseError {
            message: clap_error_message(&rendered),
        },
    }
}

fn first_quoted_token(message: &str) -> Option<String> {
    let start = message.find('\'')?;
    let end = message[start + 1..].find('\'')?;
    Some(message[start + 1..start + 1 + end].to_string())
}

fn clap_error_message(message: &str) -> String {
    message
        .lines()
        .find_map(|line| line.strip_prefix("error: "))
        .or_else(|| message.lines().next())
        .unwrap_or("failed to parse arguments")
        .to_string()
}

fn parse_usize(flag: &str, value: &str) -> Result<usize> {
    value.parse::<usize>().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be a positive integer".to_string(),
    })
}

fn parse_u32(flag: &str, value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}

fn parse_u8(flag: &str, value: &str) -> Result<u8> {
    value.parse::<u8>().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be an integer between 0 and 255".to_string(),
    })
}
