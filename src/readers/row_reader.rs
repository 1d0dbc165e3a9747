use crate::error::{ProcessingError, Result};
use crate::models::RawRow;
use crate::utils::constants::DEFAULT_BUFFER_SIZE;
use encoding_rs::UTF_8;
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

pub type FileRows = RowIterator<DecodeReaderBytes<BufReader<File>, Vec<u8>>>;

/// Counters for rows the reader had to tidy up before handing them out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub rows_read: usize,
    pub blank_rows_skipped: usize,
    pub rows_with_extra_fields: usize,
    pub rows_with_missing_fields: usize,
}

impl ReaderStats {
    pub fn summary(&self) -> String {
        format!(
            "{} rows read, {} blank rows skipped, {} rows with extra fields, {} rows with missing fields",
            self.rows_read,
            self.blank_rows_skipped,
            self.rows_with_extra_fields,
            self.rows_with_missing_fields
        )
    }
}

/// Reads delimited files into [`RawRow`]s.
///
/// Input must be UTF-8, optionally with a byte-order mark; bytes are passed
/// through undecoded and an invalid sequence fails the file with
/// [`ProcessingError::InvalidFormat`] instead of being replaced. Column names come
/// from the header line, or from an explicit field-name list for header-less
/// files, and are lower-cased once here.
pub struct CsvRowReader {
    delimiter: u8,
    fieldnames: Option<Vec<String>>,
}

impl CsvRowReader {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            fieldnames: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Treat every line as data and name the columns explicitly.
    pub fn with_fieldnames(mut self, fieldnames: Option<Vec<String>>) -> Self {
        self.fieldnames = fieldnames;
        self
    }

    pub fn open(&self, path: &Path) -> Result<FileRows> {
        let file = File::open(path)?;
        let decoded = DecodeReaderBytesBuilder::new()
            .encoding(Some(UTF_8))
            .bom_override(true)
            .strip_bom(true)
            .utf8_passthru(true)
            .build(BufReader::with_capacity(DEFAULT_BUFFER_SIZE, file));
        self.from_reader(decoded)
    }

    pub fn from_reader<R: Read>(&self, reader: R) -> Result<RowIterator<R>> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.fieldnames.is_none())
            .flexible(true)
            .from_reader(reader);

        let headers = match &self.fieldnames {
            Some(names) => names.iter().map(|n| n.to_lowercase()).collect(),
            None => csv_reader
                .headers()
                .map_err(reader_fault)?
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
        };

        Ok(RowIterator {
            reader: csv_reader,
            headers,
            record: csv::StringRecord::new(),
            stats: ReaderStats::default(),
        })
    }
}

impl Default for CsvRowReader {
    fn default() -> Self {
        Self::new()
    }
}

fn reader_fault(error: csv::Error) -> ProcessingError {
    match error.kind() {
        csv::ErrorKind::Utf8 { pos, err } => ProcessingError::InvalidFormat(format!(
            "input is not valid UTF-8{}: {}",
            pos.as_ref()
                .map(|p| format!(" at line {}", p.line()))
                .unwrap_or_default(),
            err
        )),
        _ => ProcessingError::Csv(error),
    }
}

/// Lazily yields non-blank rows. Values beyond the header width are dropped
/// and short rows simply lack the trailing columns; both are counted.
pub struct RowIterator<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    record: csv::StringRecord,
    stats: ReaderStats,
}

impl<R: Read> RowIterator<R> {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    fn next_row(&mut self) -> Result<Option<RawRow>> {
        loop {
            if !self
                .reader
                .read_record(&mut self.record)
                .map_err(reader_fault)?
            {
                return Ok(None);
            }
            self.stats.rows_read += 1;

            if self.record.len() > self.headers.len() {
                self.stats.rows_with_extra_fields += 1;
            } else if self.record.len() < self.headers.len() {
                self.stats.rows_with_missing_fields += 1;
            }

            let row = RawRow::from_pairs(
                self.headers
                    .iter()
                    .zip(self.record.iter())
                    .map(|(name, value)| (name.as_str(), value)),
            );

            if row.is_blank() {
                self.stats.blank_rows_skipped += 1;
                debug!(line = self.stats.rows_read, "Empty row detected, skipping");
                continue;
            }

            return Ok(Some(row));
        }
    }
}

impl<R: Read> Iterator for RowIterator<R> {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_header_names_are_lowercased() -> Result<()> {
        let data = "Region,VARIABLE,Year,Value\nAT,GDP,2000,1.5\n";
        let mut rows = CsvRowReader::new().from_reader(data.as_bytes())?;

        assert_eq!(rows.headers(), &["region", "variable", "year", "value"]);
        let row = rows.next().unwrap()?;
        assert_eq!(row.get("region"), Some("AT"));
        assert_eq!(row.get("value"), Some("1.5"));
        assert!(rows.next().is_none());
        Ok(())
    }

    #[test]
    fn test_fieldnames_override_treats_first_line_as_data() -> Result<()> {
        let data = "AT,2000\nDE,2001\n";
        let rows: Vec<RawRow> = CsvRowReader::new()
            .with_fieldnames(Some(vec!["Region".into(), "Year".into()]))
            .from_reader(data.as_bytes())?
            .collect::<Result<_>>()?;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("region"), Some("AT"));
        assert_eq!(rows[1].get("year"), Some("2001"));
        Ok(())
    }

    #[test]
    fn test_extra_and_missing_fields_are_discarded_and_counted() -> Result<()> {
        let data = "a,b\n1,2,3\n4\n5,6\n";
        let mut rows = CsvRowReader::new().from_reader(data.as_bytes())?;
        let collected: Vec<RawRow> = rows.by_ref().collect::<Result<_>>()?;

        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0].len(), 2);
        assert_eq!(collected[1].get("b"), None);
        assert_eq!(rows.stats().rows_with_extra_fields, 1);
        assert_eq!(rows.stats().rows_with_missing_fields, 1);
        Ok(())
    }

    #[test]
    fn test_blank_rows_are_skipped() -> Result<()> {
        let data = "a,b\n , \n1,2\n,\n";
        let mut rows = CsvRowReader::new().from_reader(data.as_bytes())?;
        let collected: Vec<RawRow> = rows.by_ref().collect::<Result<_>>()?;

        assert_eq!(collected.len(), 1);
        assert_eq!(rows.stats().blank_rows_skipped, 2);
        assert_eq!(rows.stats().rows_read, 3);
        Ok(())
    }

    #[test]
    fn test_open_strips_byte_order_mark() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"\xEF\xBB\xBFRegion,Year\nAT,2000\n")?;
        file.flush()?;

        let mut rows = CsvRowReader::new().open(file.path())?;
        assert_eq!(rows.headers(), &["region", "year"]);
        assert_eq!(rows.next().unwrap()?.get("region"), Some("AT"));
        Ok(())
    }

    #[test]
    fn test_invalid_utf8_is_a_format_error() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"\xEF\xBB\xBFregion,year\nAT,2000\nA\xFF\xFE,2001\n")?;
        file.flush()?;

        let mut rows = CsvRowReader::new().open(file.path())?;
        assert_eq!(rows.next().unwrap()?.get("region"), Some("AT"));

        let err = rows.next().unwrap().unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidFormat(_)));
        assert!(err.to_string().contains("not valid UTF-8"));
        Ok(())
    }

    #[test]
    fn test_invalid_utf8_in_header_is_a_format_error() {
        let err = CsvRowReader::new()
            .from_reader(&b"reg\xFFion,year\n"[..])
            .err()
            .unwrap();
        assert!(matches!(err, ProcessingError::InvalidFormat(_)));
    }
}
