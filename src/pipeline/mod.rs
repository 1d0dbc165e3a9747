pub mod merge;
pub mod validation;

use crate::error::Result;
use crate::models::ValidatedRow;
use crate::processors::{ErrorCollector, RowValidator};
use crate::readers::RowIterator;
use crate::utils::constants::{INPUT_DIRECTORY, PLACEHOLDER_FILE};
use crate::utils::{remote_name, ProgressReporter};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use merge::{MergeJob, MergeOutcome};
pub use validation::{ValidationJob, ValidationOutcome};

const PROGRESS_STEP: usize = 10_000;

/// A job input: where it lives locally and its workspace-relative name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub local: PathBuf,
    pub name: String,
}

impl InputFile {
    pub fn new(workspace: &Path, relative: impl AsRef<Path>) -> Self {
        let relative = relative.as_ref();
        Self {
            local: workspace.join(relative),
            name: relative.to_string_lossy().replace('\\', "/"),
        }
    }

    /// Name of the object in the project store.
    pub fn remote_name(&self) -> String {
        remote_name(&self.name)
    }
}

/// Every file under `<workspace>/inputs`, recursively, in path order.
pub fn discover_inputs(workspace: &Path) -> Result<Vec<InputFile>> {
    let root = workspace.join(INPUT_DIRECTORY);
    let mut inputs = Vec::new();

    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || entry.file_name() == PLACEHOLDER_FILE {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(workspace)
            .unwrap_or_else(|_| entry.path());
        inputs.push(InputFile::new(workspace, relative));
    }

    debug!(count = inputs.len(), root = %root.display(), "Discovered input files");
    Ok(inputs)
}

/// Validate every row, handing accepted rows to `on_accept` until the first
/// rejection. Rejected rows are recorded; any other fault aborts.
pub(crate) fn validate_rows<R, F>(
    rows: &mut RowIterator<R>,
    validator: &RowValidator,
    progress: &ProgressReporter,
    mut on_accept: F,
) -> Result<ErrorCollector>
where
    R: Read,
    F: FnMut(&ValidatedRow) -> Result<()>,
{
    let mut errors = ErrorCollector::new();
    let mut processed = 0usize;

    for row in rows.by_ref() {
        match validator.try_validate(row?) {
            Ok(validated) => {
                if !errors.has_rejections() {
                    on_accept(&validated)?;
                }
            }
            Err(rejected) if rejected.error.is_row_fault() => {
                errors.record(rejected.error.to_string(), &rejected.row);
            }
            Err(rejected) => return Err(rejected.error),
        }

        processed += 1;
        if processed % PROGRESS_STEP == 0 {
            progress.update(processed as u64);
        }
    }
    progress.update(processed as u64);

    Ok(errors)
}

pub(crate) fn remove_temporaries(paths: &[&Path]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove temporary file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discovery_walks_inputs_and_skips_placeholder() -> Result<()> {
        let dir = TempDir::new()?;
        let inputs = dir.path().join("inputs");
        fs::create_dir_all(inputs.join("nested"))?;
        fs::write(inputs.join(".gitkeep"), "")?;
        fs::write(inputs.join("b.csv"), "x\n")?;
        fs::write(inputs.join("nested/a.csv"), "x\n")?;
        fs::write(dir.path().join("outside.csv"), "x\n")?;

        let found = discover_inputs(dir.path())?;
        let names: Vec<&str> = found.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(names, vec!["inputs/b.csv", "inputs/nested/a.csv"]);
        assert_eq!(found[1].remote_name(), "nested/a.csv");
        assert_eq!(found[1].local, inputs.join("nested/a.csv"));
        Ok(())
    }

    #[test]
    fn test_missing_inputs_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(discover_inputs(dir.path()).is_err());
    }
}
