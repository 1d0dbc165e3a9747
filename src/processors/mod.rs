pub mod error_collector;
pub mod file_merger;
pub mod metadata_aggregator;
pub mod row_validator;
pub mod sort_stage;

pub use error_collector::{ErrorCollector, ErrorEntry};
pub use file_merger::{check_same_template_type, FileMerger, LineEnding, MergeSummary};
pub use metadata_aggregator::{MetadataAggregator, MetadataCollector};
pub use row_validator::{format_template, RejectedRow, RowValidator};
pub use sort_stage::{SortKey, SortStage};
