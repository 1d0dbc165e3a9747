pub mod row_reader;

pub use row_reader::{CsvRowReader, FileRows, ReaderStats, RowIterator};
