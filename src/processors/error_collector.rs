use crate::models::RawRow;
use crate::utils::constants::ERROR_LIMIT;
use std::collections::HashSet;
use std::fmt::Write;

const BANNER_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub message: String,
    pub row: String,
}

/// Bounded, de-duplicated record of row faults for one file.
///
/// Entries are keyed by message; the first offending row for a message is the
/// one kept. Every rejected row is counted, recorded or not.
#[derive(Debug)]
pub struct ErrorCollector {
    limit: usize,
    entries: Vec<ErrorEntry>,
    seen: HashSet<String>,
    rejected_rows: usize,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self {
            limit: ERROR_LIMIT,
            entries: Vec::new(),
            seen: HashSet::new(),
            rejected_rows: 0,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn record(&mut self, message: impl Into<String>, row: &RawRow) {
        self.rejected_rows += 1;
        let message = message.into();
        if self.entries.len() >= self.limit || self.seen.contains(&message) {
            return;
        }
        self.seen.insert(message.clone());
        self.entries.push(ErrorEntry {
            message,
            row: row.to_string(),
        });
    }

    /// True once any row was rejected, whether or not its message was kept.
    pub fn has_rejections(&self) -> bool {
        self.rejected_rows > 0
    }

    pub fn rejected_rows(&self) -> usize {
        self.rejected_rows
    }

    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    pub fn report(&self) -> String {
        let rule = "!".repeat(BANNER_WIDTH);
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(
            out,
            "{:^width$}",
            "!!! INVALID DATA DETECTED !!!",
            width = BANNER_WIDTH
        );
        let _ = writeln!(out, "{}", rule);
        for entry in &self.entries {
            let _ = writeln!(out, "\n--- ERROR ---");
            let _ = writeln!(out, "Details: {}", entry.message);
            let _ = writeln!(out, "Row Data: {}", entry.row);
        }
        if self.rejected_rows > self.entries.len() {
            let _ = writeln!(
                out,
                "\n({} rejected rows in total, {} distinct errors shown)",
                self.rejected_rows,
                self.entries.len()
            );
        }
        let _ = writeln!(out, "\n{}", rule);
        out
    }
}

impl Default for ErrorCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: &str) -> RawRow {
        RawRow::from_pairs([("region", value)])
    }

    #[test]
    fn test_identical_messages_collapse() {
        let mut errors = ErrorCollector::new();
        for i in 0..100 {
            errors.record("'XX' must be one of [AT, DE]", &row(&i.to_string()));
        }

        assert_eq!(errors.entries().len(), 1);
        assert_eq!(errors.rejected_rows(), 100);
        assert_eq!(errors.entries()[0].row, row("0").to_string());
    }

    #[test]
    fn test_cap_on_distinct_messages() {
        let mut errors = ErrorCollector::new();
        for i in 0..200 {
            errors.record(format!("error {}", i), &row("x"));
        }

        assert_eq!(errors.entries().len(), ERROR_LIMIT);
        assert_eq!(errors.rejected_rows(), 200);
        assert!(errors.has_rejections());
    }

    #[test]
    fn test_report_lists_details_and_rows() {
        let mut errors = ErrorCollector::new().with_limit(1);
        errors.record("bad region", &row("XX"));
        errors.record("bad year", &row("YY"));

        let report = errors.report();
        assert!(report.contains("!!! INVALID DATA DETECTED !!!"));
        assert!(report.contains("Details: bad region"));
        assert!(report.contains("Row Data: {region: \"XX\"}"));
        assert!(!report.contains("bad year"));
        assert!(report.contains("2 rejected rows in total"));
    }

    #[test]
    fn test_rejections_count_even_when_nothing_is_kept() {
        let mut errors = ErrorCollector::new().with_limit(0);
        assert!(!errors.has_rejections());

        errors.record("bad region", &row("XX"));
        assert!(errors.entries().is_empty());
        assert!(errors.has_rejections());
        assert_eq!(errors.rejected_rows(), 1);
    }
}
