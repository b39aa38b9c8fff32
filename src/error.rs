use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds surfaced by the batcher.
///
/// Command-line usage errors are reported by clap before any of these can occur.
#[derive(Debug, Error)]
pub enum BatcherError {
    /// Bad numeric option, missing input file, or missing external tool
    #[error("Validation error: {0}")]
    Validation(String),

    /// The input file list has no lines
    #[error("Input file list is empty: {}", .0.display())]
    EmptyInput(PathBuf),

    /// A single indexer invocation failed; logged and tolerated
    #[error("batch {batch_id} failed: {reason}")]
    BatchFailure { batch_id: String, reason: String },

    /// Every batch failed, nothing to merge
    #[error("No index containers were produced ({failed} of {total} batches failed)")]
    NoOutput { total: usize, failed: usize },

    /// The final merge failed or left no output behind
    #[error("Merge failed: {0}")]
    Merge(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BatcherError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
