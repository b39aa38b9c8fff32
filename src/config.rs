use log::{debug, info};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::BatcherError;
use crate::tools::ExternalTool;

/// Upper bound on concurrent indexer processes
pub const MAX_JOBS: usize = 1024;

/// Validated settings for one run, passed explicitly to every stage
#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub output: PathBuf,
    pub batch_size: usize,
    pub jobs: usize,
    pub temp_dir: Option<PathBuf>,
    pub keep_temp: bool,
    pub indexer: ExternalTool,
    pub merger: ExternalTool,
    pub format: String,
    pub container_ext: String,
    pub timeout: Option<Duration>,
    pub report: Option<PathBuf>,
    pub show_progress: bool,
}

impl Config {
    /// Check numeric ranges, the input file and both external tools
    pub fn from_cli(cli: &Cli) -> Result<Self, BatcherError> {
        let batch_size = positive("batch size", &cli.batch_size)?;

        let jobs = match cli.jobs.as_deref() {
            Some(jobs) => positive("jobs", jobs)?,
            None => {
                let cores = num_cpus::get();
                debug!("Auto-detected {} CPU cores", cores);
                cores.min(MAX_JOBS)
            }
        };
        if jobs > MAX_JOBS {
            return Err(BatcherError::Validation(format!(
                "jobs must be at most {}, got {}",
                MAX_JOBS, jobs
            )));
        }

        let timeout = match cli.timeout {
            Some(0) => {
                return Err(BatcherError::Validation(
                    "timeout must be a positive number of seconds".to_string(),
                ))
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let input = PathBuf::from(&cli.input);
        if !input.is_file() {
            return Err(BatcherError::Validation(format!(
                "Input file does not exist: {}",
                cli.input
            )));
        }

        let output = PathBuf::from(&cli.output);
        if output == input {
            return Err(BatcherError::Validation(
                "Output path must differ from the input file list".to_string(),
            ));
        }

        if cli.format.trim().is_empty() {
            return Err(BatcherError::Validation("output format must not be empty".to_string()));
        }

        let container_ext = cli.container_ext.trim_start_matches('.').to_string();
        if container_ext.is_empty() || container_ext.contains(['/', '\\']) {
            return Err(BatcherError::Validation(format!(
                "Invalid container extension: '{}'",
                cli.container_ext
            )));
        }

        let indexer = ExternalTool::locate(&cli.indexer)?;
        let merger = ExternalTool::locate(&cli.merger)?;
        info!("Indexer: {}", indexer.path.display());
        info!("Merger: {}", merger.path.display());

        Ok(Self {
            input,
            output,
            batch_size,
            jobs,
            temp_dir: cli.temp_dir.as_ref().map(PathBuf::from),
            keep_temp: cli.keep_temp,
            indexer,
            merger,
            format: cli.format.clone(),
            container_ext,
            timeout,
            report: cli.report.as_ref().map(PathBuf::from),
            show_progress: !cli.no_progress,
        })
    }
}

/// Parse a strictly positive integer option
fn positive(name: &str, value: &str) -> Result<usize, BatcherError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(BatcherError::Validation(format!(
            "{} must be a positive integer, got '{}'",
            name, value
        ))),
    }
}
