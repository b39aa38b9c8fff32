use serde::{Deserialize, Serialize};

/// Per-batch line of the run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub id: String,
    pub lines: usize,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub container: Option<String>,
    pub reason: Option<String>,
    pub elapsed_secs: f64,
}

/// Statistics from a full index run, also written as the JSON run report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: String,
    pub input: String,
    pub output: String,
    pub input_lines: usize,
    pub batch_size: usize,
    pub jobs: usize,
    pub batch_count: usize,
    pub batches_succeeded: usize,
    pub batches_failed: usize,
    pub output_bytes: Option<u64>,
    #[serde(default)]
    pub merged_containers: usize,
    #[serde(default)]
    pub merge_elapsed_secs: f64,
    pub elapsed_secs: f64,
    pub error: Option<String>,
    pub batches: Vec<BatchReport>,
}

impl RunStats {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.output_bytes.is_some()
    }
}
