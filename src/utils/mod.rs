pub mod constants;
pub mod filename;
pub mod progress;

pub use constants::*;
pub use filename::{
    merge_output_name, merge_supporter_name, parquet_companion, remote_name, sorted_path,
    validated_path, validation_supporter_name,
};
pub use progress::ProgressReporter;
