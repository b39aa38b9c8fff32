use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{create_spinner, format_bytes, format_elapsed, remove_file_if_exists};
use crate::error::BatcherError;
use crate::tools::ExternalTool;

/// Settings for the final merge
pub struct MergeOptions<'a> {
    pub merger: &'a ExternalTool,
    pub output: &'a Path,
    /// Output driver name passed to the merge tool, e.g. "FlatGeobuf"
    pub format: &'a str,
    pub timeout: Option<Duration>,
    pub show_progress: bool,
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub output: PathBuf,
    pub bytes: u64,
    pub inputs: usize,
    pub elapsed: Duration,
}

/// Arguments for `<merger> -o <output> -f <format> -single <containers...>`
pub fn merge_args(containers: &[PathBuf], opts: &MergeOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        OsString::from("-o"),
        opts.output.as_os_str().to_os_string(),
        OsString::from("-f"),
        OsString::from(opts.format),
        OsString::from("-single"),
    ];
    args.extend(containers.iter().map(|c| c.as_os_str().to_os_string()));
    args
}

/// Merge all per-batch containers into the final output with one tool run.
///
/// The merge tool will not overwrite, so an existing output is deleted first.
pub fn merge_containers(containers: &[PathBuf], opts: &MergeOptions) -> Result<MergeReport> {
    if containers.is_empty() {
        return Err(BatcherError::Merge("no containers to merge".to_string()).into());
    }

    if remove_file_if_exists(opts.output)
        .map_err(|e| BatcherError::io(opts.output, e))
        .context("Failed to remove existing output")?
    {
        info!("Removed existing output: {}", opts.output.display());
    }

    if let Some(parent) = opts.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| BatcherError::io(parent, e))
            .context("Failed to create output directory")?;
    }

    info!(
        "Merging {} container(s) into {} ({})",
        containers.len(),
        opts.output.display(),
        opts.format
    );

    let spinner = if opts.show_progress {
        let spinner = create_spinner(&format!("Running {}...", opts.merger.name));
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    } else {
        ProgressBar::hidden()
    };

    let run = opts.merger.run(&merge_args(containers, opts), opts.timeout);
    spinner.finish_and_clear();

    if !run.success() {
        let mut message = format!("{} {}", opts.merger.name, run.status);
        if !run.stderr_tail.is_empty() {
            message.push_str(": ");
            message.push_str(&run.stderr_tail);
        }
        return Err(BatcherError::Merge(message).into());
    }
    debug!("{} finished in {}", opts.merger.name, format_elapsed(run.elapsed));

    let bytes = match fs::metadata(opts.output) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            return Err(BatcherError::Merge(format!(
                "{} exited 0 but {} was not created",
                opts.merger.name,
                opts.output.display()
            ))
            .into())
        }
    };
    if bytes == 0 {
        return Err(BatcherError::Merge(format!("{} is empty", opts.output.display())).into());
    }

    info!(
        "Wrote {} ({})",
        opts.output.display(),
        format_bytes(bytes)
    );

    Ok(MergeReport {
        output: opts.output.to_path_buf(),
        bytes,
        inputs: containers.len(),
        elapsed: run.elapsed,
    })
}
