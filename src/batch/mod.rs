pub mod partition;
pub mod runner;

pub use partition::*;
pub use runner::*;

use std::path::PathBuf;

use crate::common::BatchReport;
use crate::error::BatcherError;
use crate::tools::ToolRun;

/// Minimum digits in a batch identifier
const MIN_ID_WIDTH: usize = 4;

/// One contiguous slice of the input file list, written to its own list file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position in the input
    pub index: usize,
    /// Zero-padded identifier, e.g. "batch_0007"
    pub id: String,
    pub list_path: PathBuf,
    pub lines: usize,
}

/// Width needed so every identifier in a run of `batch_count` sorts lexicographically
pub fn id_width(batch_count: usize) -> usize {
    let last = batch_count.saturating_sub(1);
    last.to_string().len().max(MIN_ID_WIDTH)
}

pub fn batch_id(index: usize, width: usize) -> String {
    format!("batch_{:0width$}", index, width = width)
}

/// Outcome of running the indexer over one batch
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch: Batch,
    pub run: ToolRun,
    /// Set only when the indexer succeeded and left its container behind
    pub container: Option<PathBuf>,
}

impl BatchResult {
    pub fn succeeded(&self) -> bool {
        self.container.is_some()
    }

    pub fn failure_reason(&self) -> Option<String> {
        if self.succeeded() {
            None
        } else if self.run.success() {
            Some("missing container".to_string())
        } else {
            Some(self.run.status.to_string())
        }
    }

    pub fn to_error(&self) -> Option<BatcherError> {
        self.failure_reason().map(|reason| BatcherError::BatchFailure {
            batch_id: self.batch.id.clone(),
            reason,
        })
    }

    pub fn to_report(&self) -> BatchReport {
        BatchReport {
            id: self.batch.id.clone(),
            lines: self.batch.lines,
            succeeded: self.succeeded(),
            exit_code: self.run.exit_code(),
            container: self
                .container
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            reason: self.failure_reason(),
            elapsed_secs: self.run.elapsed.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolStatus;
    use std::time::Duration;

    fn result(status: ToolStatus, container: Option<&str>) -> BatchResult {
        BatchResult {
            batch: Batch {
                index: 2,
                id: batch_id(2, 4),
                list_path: PathBuf::from("batches/batch_0002.txt"),
                lines: 10,
            },
            run: ToolRun {
                status,
                stderr_tail: String::new(),
                elapsed: Duration::from_millis(250),
            },
            container: container.map(PathBuf::from),
        }
    }

    #[test]
    fn test_id_width() {
        assert_eq!(id_width(1), 4);
        assert_eq!(id_width(10_000), 4);
        assert_eq!(id_width(10_001), 5);
        assert_eq!(id_width(250_000), 6);
    }

    #[test]
    fn test_batch_ids_sort_in_order() {
        let width = id_width(12_000);
        let ids: Vec<String> = (0..12_000).map(|i| batch_id(i, width)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids[7], "batch_00007");
    }

    #[test]
    fn test_successful_result_report() {
        let r = result(ToolStatus::Exited(0), Some("containers/batch_0002.gpkg"));
        assert!(r.succeeded());
        assert!(r.to_error().is_none());
        let report = r.to_report();
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.container.as_deref(), Some("containers/batch_0002.gpkg"));
        assert!(report.reason.is_none());
    }

    #[test]
    fn test_failed_result_reason() {
        let r = result(ToolStatus::Exited(1), None);
        assert!(!r.succeeded());
        assert_eq!(
            r.to_error().unwrap().to_string(),
            "batch batch_0002 failed: exit status 1"
        );
    }

    #[test]
    fn test_zero_exit_without_container_is_failure() {
        let r = result(ToolStatus::Exited(0), None);
        assert!(!r.succeeded());
        assert!(r.failure_reason().unwrap().contains("missing container"));
    }
}
