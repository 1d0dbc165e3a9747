pub mod cli;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod readers;
pub mod services;
pub mod settings;
pub mod utils;
pub mod writers;

pub use error::{ProcessingError, Result};
pub use pipeline::{InputFile, MergeJob, ValidationJob};
pub use services::{LocalProjectService, ProjectService};
pub use settings::JobSettings;
