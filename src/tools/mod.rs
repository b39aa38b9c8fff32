//! External tool invocation.
//!
//! Every subprocess goes through [`ExternalTool::run`], which turns exit codes,
//! signals, timeouts and spawn failures into a [`ToolRun`] so callers never
//! inspect raw process state or stderr text to decide what happened.

pub mod locate;
pub mod process;

pub use locate::find_executable;
pub use process::run_tool;

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BatcherError;

/// How a tool invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    /// Process exited with this code
    Exited(i32),
    /// Process was killed by a signal
    Signaled,
    /// Process exceeded the configured timeout and was killed
    TimedOut(Duration),
    /// Process could not be started
    SpawnFailed(String),
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolStatus::Exited(code) => write!(f, "exit status {}", code),
            ToolStatus::Signaled => write!(f, "terminated by signal"),
            ToolStatus::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
            ToolStatus::SpawnFailed(msg) => write!(f, "failed to start: {}", msg),
        }
    }
}

/// Typed outcome of one subprocess invocation
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub status: ToolStatus,
    /// Last few KiB of the tool's stderr
    pub stderr_tail: String,
    pub elapsed: Duration,
}

impl ToolRun {
    pub fn success(&self) -> bool {
        self.status == ToolStatus::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ToolStatus::Exited(code) => Some(code),
            _ => None,
        }
    }
}

/// An external executable resolved on the search path
#[derive(Debug, Clone)]
pub struct ExternalTool {
    pub name: String,
    pub path: PathBuf,
}

impl ExternalTool {
    /// Resolve `name` on `PATH` (or as a path if it contains a separator)
    pub fn locate(name: &str) -> Result<Self, BatcherError> {
        let path = find_executable(name).ok_or_else(|| {
            BatcherError::Validation(format!("Required tool '{}' not found on PATH", name))
        })?;
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    pub fn run(&self, args: &[OsString], timeout: Option<Duration>) -> ToolRun {
        run_tool(&self.path, args, timeout)
    }
}
