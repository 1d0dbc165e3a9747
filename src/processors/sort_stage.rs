use crate::error::{ProcessingError, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// One `sort -k` key: a 1-based column, compared numerically or bytewise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: usize,
    pub numeric: bool,
}

impl SortKey {
    pub fn to_arg(self) -> String {
        format!(
            "-k{0},{0}{1}",
            self.column,
            if self.numeric { "n" } else { "" }
        )
    }
}

/// Sorts a validated CSV file with the system `sort`, keeping the header
/// first. Every column but the last (value) column is a key, in header order.
pub struct SortStage {
    delimiter: u8,
    keys: Vec<SortKey>,
}

impl SortStage {
    pub fn for_headers(headers: &[String], time_dimension: &str) -> Self {
        let key_count = headers.len().saturating_sub(1);
        let keys = headers[..key_count]
            .iter()
            .enumerate()
            .map(|(i, name)| SortKey {
                column: i + 1,
                numeric: name == time_dimension,
            })
            .collect();
        Self {
            delimiter: b',',
            keys,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-s".to_string(), format!("-t{}", self.delimiter as char)];
        args.extend(self.keys.iter().map(|k| k.to_arg()));
        args
    }

    /// Write the sorted form of `input` to `output`. The output only appears
    /// once the sort has succeeded.
    pub fn run(&self, input: &Path, output: &Path) -> Result<()> {
        let mut reader = BufReader::new(File::open(input)?);
        let mut header = Vec::new();
        reader.read_until(b'\n', &mut header)?;

        let directory = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut sorted = NamedTempFile::new_in(directory)?;
        sorted.write_all(&header)?;
        if !header.is_empty() && !header.ends_with(b"\n") {
            sorted.write_all(b"\n")?;
        }
        sorted.flush()?;

        let args = self.args();
        debug!(command = %format!("sort {}", args.join(" ")), "Sorting validated file");

        let mut child = Command::new("sort")
            .env("LC_ALL", "C")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(sorted.as_file().try_clone()?))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessingError::Sort(format!("failed to start sort: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            io::copy(&mut reader, &mut stdin)?;
        }

        let result = child.wait_with_output()?;
        if !result.status.success() {
            return Err(ProcessingError::Sort(format!(
                "sort exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        sorted
            .persist(output)
            .map_err(|e| ProcessingError::Io(e.error))?;
        info!(output = %output.display(), "Validated file sorted");
        Ok(())
    }
}
