use crate::errors::{AppError, Result};
use crate::interval::Interval;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Opens a text input, decompressing it when the name ends in `.gz`.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|err| AppError::file_access(&display, err))?;
    if display.ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Loads a BED file (plain or gzip/bgzip). Coordinates are converted to
/// 1-based inclusive.
pub fn load_bed(path: &Path) -> Result<Vec<Interval>> {
    parse_bed(open_input(path)?, &path.display().to_string())
}

pub fn parse_bed<R: BufRead>(reader: R, source_name: &str) -> Result<Vec<Interval>> {
    let mut intervals = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| AppError::file_access(source_name, err))?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with("track ")
            || line.starts_with("browser ")
        {
            continue;
        }

        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() < 3 {
            return Err(AppError::ParseError {
                message: format!("BED line with less than three fields in {source_name}: '{line}'"),
            });
        }
        let start = fields[1]
            .trim()
            .parse::<u32>()
            .ok()
            .and_then(|start| start.checked_add(1))
            .ok_or_else(|| AppError::ParseError {
                message: format!("BED line with invalid start position in {source_name}: '{line}'"),
            })?;
        let end = fields[2].trim().parse::<u32>().map_err(|_| AppError::ParseError {
            message: format!("BED line with invalid end position in {source_name}: '{line}'"),
        })?;

        intervals.push(
            Interval::new(fields[0], start, end)
                .with_annotations(fields[3..].iter().map(|field| field.to_string()).collect()),
        );
    }
    Ok(intervals)
}

/// Writes intervals as BED (0-based start, annotations appended as columns).
pub fn write_bed<W: Write + ?Sized>(writer: &mut W, intervals: &[Interval]) -> Result<()> {
    for interval in intervals {
        write!(
            writer,
            "{}\t{}\t{}",
            interval.chromosome,
            interval.start.saturating_sub(1),
            interval.end
        )?;
        for annotation in &interval.annotations {
            write!(writer, "\t{annotation}")?;
        }
        writer.write_all(b"\n")?;
    }
    Ok(())
}
