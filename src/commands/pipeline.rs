use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::batch::{partition_file_list, run_batches, RunnerOptions};
use crate::common::{format_bytes, format_elapsed, RunStats};
use crate::config::Config;
use crate::merge::{merge_containers, MergeOptions, MergeReport};
use crate::workspace::WorkDir;

/// Run the full pipeline: partition -> index batches -> merge.
///
/// The working directory is released when this function returns, on every path.
pub fn run_pipeline(config: &Config) -> Result<RunStats> {
    let start_time = Instant::now();

    info!("Starting batched footprint index build");
    info!("Input: {}", config.input.display());
    info!("Output: {}", config.output.display());
    info!("Batch size: {}, jobs: {}", config.batch_size, config.jobs);
    if let Some(timeout) = config.timeout {
        info!("Per-process timeout: {}s", timeout.as_secs());
    }

    let workdir = WorkDir::create(config.temp_dir.as_deref(), config.keep_temp)?;

    info!("Working directory: {}", workdir.root().display());

    let mut stats = RunStats {
        run_id: workdir.run_id().to_string(),
        input: config.input.to_string_lossy().to_string(),
        output: config.output.to_string_lossy().to_string(),
        batch_size: config.batch_size,
        jobs: config.jobs,
        ..Default::default()
    };

    let merged = run_stages(config, &workdir, &mut stats);
    stats.elapsed_secs = start_time.elapsed().as_secs_f64();

    let report = match merged {
        Ok(report) => report,
        Err(e) => {
            stats.error = Some(format!("{:#}", e));
            if let Some(path) = &config.report {
                if let Err(report_err) = write_report(&stats, path) {
                    warn!("Failed to write run report: {:#}", report_err);
                }
            }
            return Err(e);
        }
    };

    stats.output_bytes = Some(report.bytes);
    stats.merged_containers = report.inputs;
    stats.merge_elapsed_secs = report.elapsed.as_secs_f64();

    if let Some(path) = &config.report {
        write_report(&stats, path)?;
        info!("Run report: {}", path.display());
    }

    info!("");
    info!("==================== RUN COMPLETE ====================");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!("Paths listed: {}", stats.input_lines);
    info!("Batches: {}", stats.batch_count);
    info!("  Succeeded: {}", stats.batches_succeeded);
    if stats.batches_failed > 0 {
        info!("  Failed: {}", stats.batches_failed);
    }
    info!(
        "Merged {} container(s) in {}",
        report.inputs,
        format_elapsed(report.elapsed)
    );
    info!("Output: {} ({})", report.output.display(), format_bytes(report.bytes));
    info!("======================================================");

    drop(workdir);

    Ok(stats)
}

/// Partition, index and merge, recording batch outcomes into `stats` as they land
fn run_stages(config: &Config, workdir: &WorkDir, stats: &mut RunStats) -> Result<MergeReport> {
    info!("");
    info!("=== STEP 1/3: Partitioning file list ===");
    info!("");

    let batches = partition_file_list(&config.input, config.batch_size, workdir.batch_dir())
        .context("Partitioning failed")?;

    stats.batch_count = batches.len();
    stats.input_lines = batches.iter().map(|b| b.lines).sum();

    info!("");
    info!("=== STEP 2/3: Indexing batches ===");
    info!("");

    let runner_opts = RunnerOptions {
        indexer: &config.indexer,
        jobs: config.jobs,
        container_dir: workdir.container_dir(),
        container_ext: &config.container_ext,
        timeout: config.timeout,
        show_progress: config.show_progress,
    };

    let summary = run_batches(&batches, &runner_opts).context("Indexing failed")?;

    stats.batches = summary.results.iter().map(|r| r.to_report()).collect();
    stats.batches_succeeded = summary.succeeded();
    stats.batches_failed = summary.failed();

    let containers = summary.merge_input()?;
    if stats.batches_failed > 0 {
        warn!(
            "{} of {} batches failed; merging the {} that succeeded",
            stats.batches_failed,
            stats.batch_count,
            containers.len()
        );
    }

    info!("");
    info!("=== STEP 3/3: Merging index containers ===");
    info!("");

    let merge_opts = MergeOptions {
        merger: &config.merger,
        output: &config.output,
        format: &config.format,
        timeout: config.timeout,
        show_progress: config.show_progress,
    };
    merge_containers(&containers, &merge_opts)
}

/// Write the run statistics as pretty JSON
pub fn write_report(stats: &RunStats, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(stats).context("Failed to serialize run report")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_report_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        let stats = RunStats {
            run_id: "ab12cd34".to_string(),
            batch_count: 3,
            batches_succeeded: 2,
            batches_failed: 1,
            output_bytes: Some(4096),
            ..Default::default()
        };

        write_report(&stats, &path).unwrap();

        let loaded: RunStats = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, "ab12cd34");
        assert_eq!(loaded.batches_failed, 1);
        assert!(loaded.succeeded());
    }
}
