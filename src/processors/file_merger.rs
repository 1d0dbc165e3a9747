use crate::error::{ProcessingError, Result};
use crate::models::TemplateId;
use crate::services::ProjectService;
use crate::utils::constants::{MERGE_CHUNK_SIZE, MIN_MERGE_FILES};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How a file's last line is terminated, judged from its final two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
    Cr,
    LfCr,
    Missing,
    Empty,
}

impl LineEnding {
    pub fn classify(tail: &[u8]) -> Self {
        match tail {
            [] => LineEnding::Empty,
            [.., b'\r', b'\n'] => LineEnding::CrLf,
            [.., b'\n', b'\r'] => LineEnding::LfCr,
            [.., b'\n'] => LineEnding::Lf,
            [.., b'\r'] => LineEnding::Cr,
            _ => LineEnding::Missing,
        }
    }

    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let take = len.min(2);
        file.seek(SeekFrom::Start(len - take))?;
        let mut tail = Vec::with_capacity(2);
        file.take(take).read_to_end(&mut tail)?;
        Ok(Self::classify(&tail))
    }

    /// Only a non-empty file whose last line is unterminated needs a newline
    /// before more lines can be appended.
    pub fn needs_separator(self) -> bool {
        self == LineEnding::Missing
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub files_merged: usize,
    pub bytes_appended: u64,
    pub header: Vec<String>,
}

/// Appends validated CSV files onto the first one, dropping every later
/// file's header line.
pub struct FileMerger {
    chunk_size: usize,
}

impl FileMerger {
    pub fn new() -> Self {
        Self {
            chunk_size: MERGE_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// All files must share the first file's header (column names compared
    /// case-insensitively). Nothing is written.
    pub fn check_headers(&self, files: &[PathBuf]) -> Result<Vec<String>> {
        let Some((first, rest)) = files.split_first() else {
            return Err(ProcessingError::MergePrecondition(
                "no files to merge".to_string(),
            ));
        };

        let expected = read_header(first)?;
        for path in rest {
            let header = read_header(path)?;
            if header != expected {
                return Err(ProcessingError::MergePrecondition(format!(
                    "header of {} [{}] differs from header of {} [{}]",
                    path.display(),
                    header.join(","),
                    first.display(),
                    expected.join(",")
                )));
            }
        }
        Ok(expected)
    }

    /// Merge `files[1..]` into `files[0]` in place.
    pub fn merge(&self, files: &[PathBuf]) -> Result<MergeSummary> {
        if files.len() < MIN_MERGE_FILES {
            return Err(ProcessingError::MergePrecondition(format!(
                "at least {} files are required, got {}",
                MIN_MERGE_FILES,
                files.len()
            )));
        }
        let header = self.check_headers(files)?;

        let output = &files[0];
        let mut buffer = vec![0u8; self.chunk_size];
        let mut bytes_appended = 0u64;

        for path in &files[1..] {
            let ending = LineEnding::of_file(output)?;
            let mut merged = OpenOptions::new().append(true).open(output)?;
            if ending.needs_separator() {
                merged.write_all(b"\n")?;
                bytes_appended += 1;
            }

            let mut source = BufReader::new(File::open(path)?);
            read_first_line(&mut source)?;

            loop {
                let read = source.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                merged.write_all(&buffer[..read])?;
                bytes_appended += read as u64;
            }
            merged.flush()?;
            debug!(file = %path.display(), ?ending, "Appended file");
        }

        info!(
            output = %output.display(),
            files = files.len(),
            bytes_appended,
            "Merged files"
        );

        Ok(MergeSummary {
            output: output.clone(),
            files_merged: files.len(),
            bytes_appended,
            header,
        })
    }
}

impl Default for FileMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// Every file must carry the first file's template type, unless the first
/// file has none on record.
pub fn check_same_template_type(
    service: &dyn ProjectService,
    names: &[String],
) -> Result<Option<TemplateId>> {
    if names.len() < MIN_MERGE_FILES {
        return Err(ProcessingError::MergePrecondition(format!(
            "at least {} files are required, got {}",
            MIN_MERGE_FILES,
            names.len()
        )));
    }

    let first_type = service.get_filename_dataset_type(&names[0])?;
    let Some(expected) = first_type else {
        return Ok(None);
    };

    for name in &names[1..] {
        let other = service.get_filename_dataset_type(name)?;
        if other != Some(expected) {
            return Err(ProcessingError::MergePrecondition(format!(
                "'{}' is not of dataset template type {}",
                name, expected
            )));
        }
    }
    Ok(Some(expected))
}

/// Reads up to and including the first `\n`, `\r\n` or lone `\r`; returns the
/// line without its terminator.
fn read_first_line<R: BufRead>(reader: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    loop {
        let (consumed, terminator) = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(line);
            }
            match buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(i) => {
                    line.extend_from_slice(&buf[..i]);
                    (i + 1, Some(buf[i]))
                }
                None => {
                    line.extend_from_slice(buf);
                    (buf.len(), None)
                }
            }
        };
        reader.consume(consumed);

        if let Some(terminator) = terminator {
            if terminator == b'\r' && reader.fill_buf()?.first() == Some(&b'\n') {
                reader.consume(1);
            }
            return Ok(line);
        }
    }
}

fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let raw = read_first_line(&mut reader)?;
    let line = raw.strip_prefix(UTF8_BOM).unwrap_or(&raw);
    let text = String::from_utf8_lossy(line);
    Ok(text
        .split(',')
        .map(|name| name.trim().to_lowercase())
        .collect())
}
