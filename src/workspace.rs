use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::BatcherError;

const BATCH_SUBDIR: &str = "batches";
const CONTAINER_SUBDIR: &str = "containers";

/// Working directory for one run, holding batch lists and index containers.
///
/// Dropping the handle removes the directory and everything under it unless
/// retention was requested. A caller-supplied directory must be absent or
/// empty, so cleanup never touches data this run did not create.
#[derive(Debug)]
pub struct WorkDir {
    run_id: String,
    root: PathBuf,
    batch_dir: PathBuf,
    container_dir: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Create the working directory: `requested`, or `<system temp>/tileindex-<run id>`
    pub fn create(requested: Option<&Path>, keep: bool) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string()[..8].to_string();

        let root = requested
            .map(Path::to_path_buf)
            .unwrap_or_else(|| env::temp_dir().join(format!("tileindex-{}", run_id)));

        if root.exists() {
            if !root.is_dir() {
                return Err(BatcherError::Validation(format!(
                    "Temp path exists and is not a directory: {}",
                    root.display()
                ))
                .into());
            }
            let mut entries = fs::read_dir(&root).map_err(|e| BatcherError::io(&root, e))?;
            if entries.next().is_some() {
                return Err(BatcherError::Validation(format!(
                    "Temp directory is not empty: {}",
                    root.display()
                ))
                .into());
            }
        }

        fs::create_dir_all(&root)
            .map_err(|e| BatcherError::io(&root, e))
            .context("Failed to create working directory")?;

        Ok(Self {
            batch_dir: root.join(BATCH_SUBDIR),
            container_dir: root.join(CONTAINER_SUBDIR),
            run_id,
            root,
            keep,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn batch_dir(&self) -> &Path {
        &self.batch_dir
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    pub fn keep(&self) -> bool {
        self.keep
    }

    fn cleanup(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.root)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            info!("Keeping working directory: {}", self.root.display());
            return;
        }
        debug!("Removing working directory: {}", self.root.display());
        if let Err(e) = self.cleanup() {
            warn!(
                "Failed to remove working directory {}: {}",
                self.root.display(),
                e
            );
        }
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
