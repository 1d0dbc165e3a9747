use crate::error::Result;
use crate::models::RawRow;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Writes accepted rows to the validated CSV, columns in validated-header
/// order. Cells a row lacks are written empty.
pub struct ValidatedCsvWriter {
    headers: Vec<String>,
    writer: csv::Writer<BufWriter<File>>,
    rows_written: usize,
}

impl ValidatedCsvWriter {
    pub fn create(path: &Path, headers: &[String]) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::new(File::create(path)?));
        writer.write_record(headers)?;
        Ok(Self {
            headers: headers.to_vec(),
            writer,
            rows_written: 0,
        })
    }

    pub fn write_row(&mut self, row: &RawRow) -> Result<()> {
        self.writer.write_record(
            self.headers
                .iter()
                .map(|name| row.get(name).unwrap_or_default()),
        )?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        Ok(self.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rows_follow_header_order() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("x_validation.csv");
        let headers: Vec<String> = ["region", "year", "value"].iter().map(|s| s.to_string()).collect();

        let mut writer = ValidatedCsvWriter::create(&path, &headers)?;
        writer.write_row(&RawRow::from_pairs([
            ("value", "1.5"),
            ("extra", "ignored"),
            ("region", "AT"),
            ("year", "2000"),
        ]))?;
        writer.write_row(&RawRow::from_pairs([("region", "Vienna, AT"), ("year", "2001")]))?;
        assert_eq!(writer.finish()?, 2);

        assert_eq!(
            fs::read_to_string(&path)?,
            "region,year,value\nAT,2000,1.5\n\"Vienna, AT\",2001,\n"
        );
        Ok(())
    }
}
