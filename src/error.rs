use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Template declaration error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// The template itself is malformed. Aborts the job before any row is read.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A single row does not comply with the template. Recorded and skipped.
    #[error("{0}")]
    RowValidation(String),

    /// Stored per-file metadata cannot be merged, usually because it predates the schema.
    #[error("Metadata aggregation error: {0}")]
    Aggregate(String),

    #[error("Merge precondition failed: {0}")]
    MergePrecondition(String),

    #[error("Invalid data: {rejected_rows} row(s) in {file} do not comply with template rules")]
    InvalidData { file: String, rejected_rows: usize },

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("External sort failed: {0}")]
    Sort(String),

    #[error("Project service error: {0}")]
    Remote(String),

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    pub fn schema(message: impl Into<String>) -> Self {
        ProcessingError::Schema(message.into())
    }

    pub fn row(message: impl Into<String>) -> Self {
        ProcessingError::RowValidation(message.into())
    }

    /// Row faults are recoverable; every other variant aborts the file or the job.
    pub fn is_row_fault(&self) -> bool {
        matches!(self, ProcessingError::RowValidation(_))
    }
}
