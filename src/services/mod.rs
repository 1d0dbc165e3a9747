pub mod local;

use crate::error::Result;
use crate::models::{TemplateId, ValidationMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;

pub use local::LocalProjectService;

pub type ObjectId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetTemplateDetails {
    pub rules: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub dataset_template_id: TemplateId,
    pub validation_metadata: Value,
}

/// The remote project store the jobs talk to. Names are remote object names,
/// i.e. local paths with the `inputs/` prefix already removed.
pub trait ProjectService {
    fn get_dataset_template_details(&self, template_id: TemplateId) -> Result<DatasetTemplateDetails>;

    fn get_filename_validation_details(&self, name: &str) -> Result<ValidationDetails>;

    /// Template id a file was last validated against, if any.
    fn get_filename_dataset_type(&self, name: &str) -> Result<Option<TemplateId>>;

    fn add_filestream_as_job_output(&self, name: &str, stream: &mut dyn Read) -> Result<ObjectId>;

    fn add_filestream_as_validation_supporter(
        &self,
        name: &str,
        stream: &mut dyn Read,
    ) -> Result<ObjectId>;

    fn replace_file_content(&self, name: &str, stream: &mut dyn Read) -> Result<ObjectId>;

    fn register_validation(
        &self,
        object_id: &ObjectId,
        template_id: TemplateId,
        metadata: &ValidationMetadata,
        supporters: &[ObjectId],
    ) -> Result<()>;
}
