use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::{Batch, BatchResult};
use crate::common::{create_batch_progress_bar, format_elapsed, remove_file_if_exists};
use crate::error::BatcherError;
use crate::tools::ExternalTool;

/// Settings for one runner phase
pub struct RunnerOptions<'a> {
    pub indexer: &'a ExternalTool,
    /// Upper bound on concurrent indexer processes
    pub jobs: usize,
    pub container_dir: &'a Path,
    /// Extension of per-batch containers, without the dot
    pub container_ext: &'a str,
    pub timeout: Option<Duration>,
    pub show_progress: bool,
}

impl RunnerOptions<'_> {
    pub fn container_path(&self, batch: &Batch) -> PathBuf {
        self.container_dir
            .join(format!("{}.{}", batch.id, self.container_ext))
    }
}

/// All batch outcomes, in batch order
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub results: Vec<BatchResult>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Containers of successful batches, in batch order
    pub fn containers(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter_map(|r| r.container.clone())
            .collect()
    }

    /// The merge input, or `NoOutput` if every batch failed
    pub fn merge_input(&self) -> Result<Vec<PathBuf>, BatcherError> {
        let containers = self.containers();
        if containers.is_empty() {
            return Err(BatcherError::NoOutput {
                total: self.results.len(),
                failed: self.failed(),
            });
        }
        Ok(containers)
    }
}

/// Run the indexer once per batch on a pool of `jobs` threads.
///
/// Individual failures are logged and recorded; they never stop other batches.
pub fn run_batches(batches: &[Batch], opts: &RunnerOptions) -> Result<RunSummary> {
    let start_time = Instant::now();
    let jobs = opts.jobs.max(1);

    fs::create_dir_all(opts.container_dir)
        .map_err(|e| BatcherError::io(opts.container_dir, e))
        .context("Failed to create container directory")?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("indexer-{}", i))
        .build()
        .context("Failed to build worker pool")?;

    info!(
        "Indexing {} batch(es) with {} using {} worker(s)",
        batches.len(),
        opts.indexer.name,
        jobs
    );

    let progress = if opts.show_progress {
        create_batch_progress_bar(batches.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let (sender, receiver) = bounded::<BatchResult>(jobs.saturating_mul(4));

    let collector = thread::spawn(move || {
        let mut results = Vec::new();
        let mut failures = 0;

        for result in receiver {
            match result.to_error() {
                None => progress.suspend(|| {
                    debug!(
                        "{} done in {} ({} paths)",
                        result.batch.id,
                        format_elapsed(result.run.elapsed),
                        result.batch.lines
                    )
                }),
                Some(err) => {
                    failures += 1;
                    progress.suspend(|| {
                        error!("{}", err);
                        if !result.run.stderr_tail.is_empty() {
                            debug!("{} stderr:\n{}", result.batch.id, result.run.stderr_tail);
                        }
                    });
                }
            }
            progress.set_message(format!("{} failed", failures));
            progress.inc(1);
            results.push(result);
        }

        progress.finish_with_message(format!("{} failed", failures));
        results
    });

    pool.install(|| {
        batches.par_iter().for_each_with(sender, |sender, batch| {
            let result = index_batch(batch, opts);
            if let Err(e) = sender.send(result) {
                error!("Failed to report result for {}: {}", batch.id, e);
            }
        });
    });

    let mut results = match collector.join() {
        Ok(results) => results,
        Err(e) => return Err(anyhow::anyhow!("Result collector panicked: {:?}", e)),
    };
    results.sort_by_key(|r| r.batch.index);

    let summary = RunSummary {
        results,
        elapsed: start_time.elapsed(),
    };

    info!(
        "Indexing finished in {}: {} succeeded, {} failed",
        format_elapsed(summary.elapsed),
        summary.succeeded(),
        summary.failed()
    );

    Ok(summary)
}

/// Run the indexer over a single batch.
///
/// Any container left from an earlier run is removed first so the indexer
/// writes a fresh one rather than appending to it.
pub fn index_batch(batch: &Batch, opts: &RunnerOptions) -> BatchResult {
    let container = opts.container_path(batch);

    if let Err(e) = remove_file_if_exists(&container) {
        warn!("Could not remove stale container {}: {}", container.display(), e);
    }

    let args: Vec<OsString> = vec![
        container.clone().into_os_string(),
        OsString::from("--optfile"),
        batch.list_path.clone().into_os_string(),
    ];

    let run = opts.indexer.run(&args, opts.timeout);
    let produced = run.success() && container.is_file();

    if !produced {
        if let Err(e) = remove_file_if_exists(&container) {
            warn!("Could not remove partial container {}: {}", container.display(), e);
        }
    }

    BatchResult {
        batch: batch.clone(),
        run,
        container: produced.then_some(container),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::batch::partition_file_list;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Copies the batch list into the container; fails on batches naming FAIL
    const FAKE_INDEXER: &str = r#"#!/bin/sh
out="$1"
list="$3"
if grep -q FAIL "$list"; then
    echo "ERROR 4: cannot open dataset" >&2
    exit 1
fi
cp "$list" "$out"
"#;

    fn write_script(dir: &Path, name: &str, body: &str) -> ExternalTool {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        ExternalTool {
            name: name.to_string(),
            path,
        }
    }

    fn make_batches(dir: &Path, lines: &[&str], batch_size: usize) -> Vec<Batch> {
        let input = dir.join("files.txt");
        let content: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        fs::write(&input, content).unwrap();
        partition_file_list(&input, batch_size, &dir.join("batches")).unwrap()
    }

    fn options<'a>(indexer: &'a ExternalTool, container_dir: &'a Path, jobs: usize) -> RunnerOptions<'a> {
        RunnerOptions {
            indexer,
            jobs,
            container_dir,
            container_ext: "gpkg",
            timeout: None,
            show_progress: false,
        }
    }

    #[test]
    fn test_all_batches_succeed() {
        let dir = tempdir().unwrap();
        let indexer = write_script(dir.path(), "indexer", FAKE_INDEXER);
        let lines: Vec<String> = (0..25).map(|i| format!("/data/{}.tif", i)).collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let batches = make_batches(dir.path(), &refs, 10);
        let container_dir = dir.path().join("containers");

        let summary = run_batches(&batches, &options(&indexer, &container_dir, 4)).unwrap();

        assert_eq!(summary.results.len(), 3);
        assert_eq!(summary.succeeded(), 3);
        let containers = summary.containers();
        assert_eq!(
            containers,
            vec![
                container_dir.join("batch_0000.gpkg"),
                container_dir.join("batch_0001.gpkg"),
                container_dir.join("batch_0002.gpkg"),
            ]
        );
        for (batch, container) in batches.iter().zip(&containers) {
            assert_eq!(
                fs::read(container).unwrap(),
                fs::read(&batch.list_path).unwrap()
            );
        }
    }

    #[test]
    fn test_partial_failure_continues() {
        let dir = tempdir().unwrap();
        let indexer = write_script(dir.path(), "indexer", FAKE_INDEXER);
        let batches = make_batches(dir.path(), &["a.tif", "b.tif", "FAIL.tif", "c.tif", "d.tif"], 1);
        let container_dir = dir.path().join("containers");

        let summary = run_batches(&batches, &options(&indexer, &container_dir, 2)).unwrap();

        assert_eq!(summary.succeeded(), 4);
        assert_eq!(summary.failed(), 1);
        let failed = &summary.results[2];
        assert!(!failed.succeeded());
        assert_eq!(failed.run.exit_code(), Some(1));
        assert!(failed.run.stderr_tail.contains("cannot open dataset"));
        assert!(!container_dir.join("batch_0002.gpkg").exists());
        assert_eq!(summary.merge_input().unwrap().len(), 4);
    }

    #[test]
    fn test_total_failure_yields_no_output() {
        let dir = tempdir().unwrap();
        let indexer = write_script(dir.path(), "indexer", FAKE_INDEXER);
        let batches = make_batches(dir.path(), &["a.tif", "b.tif", "FAIL.tif", "c.tif", "d.tif"], 5);
        let container_dir = dir.path().join("containers");

        let summary = run_batches(&batches, &options(&indexer, &container_dir, 1)).unwrap();

        assert_eq!(summary.results.len(), 1);
        assert!(matches!(
            summary.merge_input(),
            Err(BatcherError::NoOutput { total: 1, failed: 1 })
        ));
    }

    #[test]
    fn test_existing_container_is_overwritten() {
        let dir = tempdir().unwrap();
        let indexer = write_script(dir.path(), "indexer", FAKE_INDEXER);
        let batches = make_batches(dir.path(), &["a.tif", "b.tif"], 2);
        let container_dir = dir.path().join("containers");
        fs::create_dir_all(&container_dir).unwrap();
        fs::write(container_dir.join("batch_0000.gpkg"), "stale data from an earlier run").unwrap();

        let opts = options(&indexer, &container_dir, 1);
        run_batches(&batches, &opts).unwrap();
        let summary = run_batches(&batches, &opts).unwrap();

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(
            fs::read_to_string(container_dir.join("batch_0000.gpkg")).unwrap(),
            "a.tif\nb.tif\n"
        );
    }

    #[test]
    fn test_zero_exit_without_container_counts_as_failure() {
        let dir = tempdir().unwrap();
        let indexer = write_script(dir.path(), "indexer", "#!/bin/sh\nexit 0\n");
        let batches = make_batches(dir.path(), &["a.tif"], 1);
        let container_dir = dir.path().join("containers");

        let summary = run_batches(&batches, &options(&indexer, &container_dir, 1)).unwrap();

        assert_eq!(summary.succeeded(), 0);
        assert!(summary.merge_input().is_err());
    }

    #[test]
    fn test_partial_container_removed_after_failure() {
        let dir = tempdir().unwrap();
        let indexer = write_script(
            dir.path(),
            "indexer",
            "#!/bin/sh\necho half-written > \"$1\"\nexit 3\n",
        );
        let batches = make_batches(dir.path(), &["a.tif", "b.tif"], 1);
        let container_dir = dir.path().join("containers");

        let summary = run_batches(&batches, &options(&indexer, &container_dir, 2)).unwrap();

        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.results[0].run.exit_code(), Some(3));
        assert!(!container_dir.join("batch_0000.gpkg").exists());
        assert!(!container_dir.join("batch_0001.gpkg").exists());
    }

    #[test]
    fn test_concurrency_never_exceeds_jobs() {
        let dir = tempdir().unwrap();
        let marks = dir.path().join("marks");
        fs::create_dir_all(&marks).unwrap();
        let script = format!(
            r#"#!/bin/sh
touch "{marks}/running.$$"
ls "{marks}" | grep -c running >> "{marks}/observed.log"
sleep 0.2
rm -f "{marks}/running.$$"
cp "$3" "$1"
"#,
            marks = marks.display()
        );
        let indexer = write_script(dir.path(), "indexer", &script);
        let lines: Vec<String> = (0..8).map(|i| format!("{}.tif", i)).collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let batches = make_batches(dir.path(), &refs, 1);
        let container_dir = dir.path().join("containers");

        let summary = run_batches(&batches, &options(&indexer, &container_dir, 2)).unwrap();

        assert_eq!(summary.succeeded(), 8);
        let observed = fs::read_to_string(marks.join("observed.log")).unwrap();
        let peak = observed
            .lines()
            .filter_map(|l| l.trim().parse::<usize>().ok())
            .max()
            .unwrap();
        assert!(peak <= 2, "observed {} concurrent indexer runs", peak);
    }

    #[test]
    fn test_timeout_marks_batch_failed() {
        let dir = tempdir().unwrap();
        let indexer = write_script(dir.path(), "indexer", "#!/bin/sh\nexec sleep 5\n");
        let batches = make_batches(dir.path(), &["a.tif"], 1);
        let container_dir = dir.path().join("containers");
        let mut opts = options(&indexer, &container_dir, 1);
        opts.timeout = Some(Duration::from_millis(200));

        let summary = run_batches(&batches, &opts).unwrap();

        assert_eq!(summary.failed(), 1);
        assert!(summary.results[0]
            .failure_reason()
            .unwrap()
            .contains("timed out"));
    }
}
