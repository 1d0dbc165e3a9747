pub mod csv_writer;
pub mod parquet_writer;

pub use csv_writer::ValidatedCsvWriter;
pub use parquet_writer::{
    column_specs, get_file_info, ColumnKind, ColumnSpec, ColumnarSummary, ColumnarWriter,
    ParquetFileInfo,
};
