use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::{batch_id, id_width, Batch};
use crate::error::BatcherError;

/// Line statistics gathered before any batch file is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCount {
    pub total: usize,
    pub blank: usize,
}

/// Count lines in a file list. A final line without a newline still counts.
pub fn count_lines(input: &Path) -> Result<LineCount> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open input file: {}", input.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut count = LineCount::default();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Failed to read input file: {}", input.display()))?;
        if read == 0 {
            break;
        }
        count.total += 1;
        if buf.iter().all(|b| b.is_ascii_whitespace()) {
            count.blank += 1;
        }
    }

    Ok(count)
}

/// Split a file list into `ceil(lines / batch_size)` list files under `batch_dir`.
///
/// Batch `i` receives lines `[i * batch_size, min((i + 1) * batch_size, total))`
/// byte-for-byte, so concatenating the batch files in identifier order gives
/// back the input. The batch directory is not created for an empty input.
pub fn partition_file_list(input: &Path, batch_size: usize, batch_dir: &Path) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(BatcherError::Validation("batch size must be positive".to_string()).into());
    }

    let count = count_lines(input)?;
    if count.total == 0 {
        return Err(BatcherError::EmptyInput(input.to_path_buf()).into());
    }
    if count.blank > 0 {
        warn!(
            "Input contains {} blank line(s); they are passed to the indexer unchanged",
            count.blank
        );
    }

    let batch_count = count.total.div_ceil(batch_size);
    let width = id_width(batch_count);

    info!(
        "Partitioning {} paths into {} batch(es) of up to {}",
        count.total, batch_count, batch_size
    );

    fs::create_dir_all(batch_dir)
        .map_err(|e| BatcherError::io(batch_dir, e))
        .context("Failed to create batch directory")?;

    let file = File::open(input)
        .with_context(|| format!("Failed to open input file: {}", input.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut batches = Vec::with_capacity(batch_count);

    for index in 0..batch_count {
        let id = batch_id(index, width);
        let list_path = batch_dir.join(format!("{}.txt", id));
        let out = File::create(&list_path)
            .with_context(|| format!("Failed to create batch file: {}", list_path.display()))?;
        let mut writer = BufWriter::new(out);
        let mut lines = 0;

        while lines < batch_size {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .with_context(|| format!("Failed to read input file: {}", input.display()))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buf)
                .with_context(|| format!("Failed to write batch file: {}", list_path.display()))?;
            lines += 1;
        }

        writer
            .flush()
            .with_context(|| format!("Failed to write batch file: {}", list_path.display()))?;

        debug!("Wrote {} ({} lines)", list_path.display(), lines);

        batches.push(Batch {
            index,
            id,
            list_path,
            lines,
        });
    }

    Ok(batches)
}
