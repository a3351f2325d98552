use std::io::{BufWriter, Write, stdout};
use std::path::Path;

use crate::bed::write_bed;
use crate::errors::{AppError, Result};
use crate::interval::Interval;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::Builder;

/// Runs `write_fn` against the output named by `path`.
///
/// `-` writes to stdout. Any other path is written to a temporary file in
/// the destination directory that replaces the destination only once
/// `write_fn` succeeded. Paths ending in `.gz` are gzip-compressed.
pub fn with_output_writer<F>(path: &str, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    if path == "-" {
        let mut out = stdout().lock();
        write_fn(&mut out)?;
        out.flush()?;
        return Ok(());
    }

    let output_path = Path::new(path);
    let parent_dir = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = Builder::new()
        .prefix(".ngscov_")
        .suffix(".tmp")
        .tempfile_in(parent_dir)
        .map_err(|err| AppError::file_access(path, err))?;

    {
        let mut buf = BufWriter::new(staged.as_file_mut());
        if path.ends_with(".gz") {
            let mut encoder = GzEncoder::new(&mut buf, Compression::default());
            write_fn(&mut encoder)?;
            encoder.finish()?;
        } else {
            write_fn(&mut buf)?;
        }
        buf.flush()?;
    }

    staged
        .persist(output_path)
        .map_err(|err| AppError::file_access(path, err.error))?;
    Ok(())
}

pub fn write_intervals(path: &str, intervals: &[Interval]) -> Result<()> {
    with_output_writer(path, |out| write_bed(out, intervals))
}
