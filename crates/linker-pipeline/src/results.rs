//! Results directory layout and provenance copies.

use std::path::{Path, PathBuf};

use chrono::Local;
use linker_types::{LinkerError, Result};

use crate::plan::{DIAGNOSTICS_DIR, INTERMEDIATE_DIR};

const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Create the run's results root (under a timestamped subdirectory when
/// `timestamp` is set) with its `intermediate/` and `diagnostics/` children.
pub fn prepare_results_directory(output: &Path, timestamp: bool) -> Result<PathBuf> {
    let root = if timestamp {
        output.join(Local::now().format(TIMESTAMP_FORMAT).to_string())
    } else {
        output.to_path_buf()
    };
    std::fs::create_dir_all(root.join(INTERMEDIATE_DIR))?;
    std::fs::create_dir_all(root.join(DIAGNOSTICS_DIR))?;
    let root = std::fs::canonicalize(&root)?;
    tracing::info!(results_dir = %root.display(), "prepared results directory");
    Ok(root)
}

/// Copy the run's specification files into `results_dir`.
pub fn copy_source_files(files: &[PathBuf], results_dir: &Path) -> Result<()> {
    for file in files {
        let Some(name) = file.file_name() else {
            return Err(LinkerError::Config(format!(
                "'{}' does not name a file",
                file.display()
            )));
        };
        std::fs::copy(file, results_dir.join(name))?;
    }
    Ok(())
}
