use crate::error::{ProcessingError, Result};
use crate::models::{TemplateId, ValidationMetadata};
use crate::services::{DatasetTemplateDetails, ObjectId, ProjectService, ValidationDetails};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

const TEMPLATES_DIR: &str = "templates";
const OBJECTS_DIR: &str = "objects";
const VALIDATIONS_DIR: &str = "validations";

/// One registered validation, stored as `validations/<object>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub object_id: ObjectId,
    pub dataset_template_id: TemplateId,
    pub validation_metadata: Value,
    pub supporters: Vec<ObjectId>,
    pub registered_at: DateTime<Utc>,
}

/// Directory-backed project store:
///
/// ```text
/// <root>/templates/<id>.json      {"rules": {...}}
/// <root>/objects/<name>           uploaded and replaced files
/// <root>/validations/<name>.json  registration records
/// ```
///
/// Object ids are the object names.
pub struct LocalProjectService {
    root: PathBuf,
}

impl LocalProjectService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn put_template(&self, template_id: TemplateId, rules: &Value) -> Result<PathBuf> {
        let path = self.template_path(template_id);
        ensure_parent(&path)?;
        let details = DatasetTemplateDetails {
            rules: rules.clone(),
        };
        fs::write(&path, serde_json::to_vec_pretty(&details)?)?;
        Ok(path)
    }

    pub fn object_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(OBJECTS_DIR).join(checked_name(name)?))
    }

    pub fn validation_record(&self, name: &str) -> Result<Option<ValidationRecord>> {
        let path = self.validation_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let record = serde_json::from_reader(File::open(&path)?)?;
        Ok(Some(record))
    }

    fn template_path(&self, template_id: TemplateId) -> PathBuf {
        self.root.join(TEMPLATES_DIR).join(format!("{}.json", template_id))
    }

    fn validation_path(&self, name: &str) -> Result<PathBuf> {
        let mut file_name = checked_name(name)?.into_os_string();
        file_name.push(".json");
        Ok(self.root.join(VALIDATIONS_DIR).join(file_name))
    }

    fn store_object(&self, name: &str, stream: &mut dyn Read) -> Result<ObjectId> {
        let path = self.object_path(name)?;
        ensure_parent(&path)?;
        let mut writer = BufWriter::new(File::create(&path)?);
        let bytes = io::copy(stream, &mut writer)?;
        writer.flush()?;
        debug!(object = name, bytes, "Stored object");
        Ok(name.to_string())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Object names must stay inside the store.
fn checked_name(name: &str) -> Result<PathBuf> {
    let relative = PathBuf::from(name.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || relative.as_os_str().is_empty() {
        return Err(ProcessingError::Remote(format!("invalid object name '{}'", name)));
    }
    Ok(relative)
}

impl ProjectService for LocalProjectService {
    fn get_dataset_template_details(&self, template_id: TemplateId) -> Result<DatasetTemplateDetails> {
        let path = self.template_path(template_id);
        let file = File::open(&path).map_err(|e| {
            ProcessingError::Remote(format!(
                "dataset template {} not found at {}: {}",
                template_id,
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_reader(file)?)
    }

    fn get_filename_validation_details(&self, name: &str) -> Result<ValidationDetails> {
        let record = self.validation_record(name)?.ok_or_else(|| {
            ProcessingError::Remote(format!("no validation registered for '{}'", name))
        })?;
        Ok(ValidationDetails {
            dataset_template_id: record.dataset_template_id,
            validation_metadata: record.validation_metadata,
        })
    }

    fn get_filename_dataset_type(&self, name: &str) -> Result<Option<TemplateId>> {
        Ok(self
            .validation_record(name)?
            .map(|record| record.dataset_template_id))
    }

    fn add_filestream_as_job_output(&self, name: &str, stream: &mut dyn Read) -> Result<ObjectId> {
        self.store_object(name, stream)
    }

    fn add_filestream_as_validation_supporter(
        &self,
        name: &str,
        stream: &mut dyn Read,
    ) -> Result<ObjectId> {
        self.store_object(name, stream)
    }

    fn replace_file_content(&self, name: &str, stream: &mut dyn Read) -> Result<ObjectId> {
        self.store_object(name, stream)
    }

    fn register_validation(
        &self,
        object_id: &ObjectId,
        template_id: TemplateId,
        metadata: &ValidationMetadata,
        supporters: &[ObjectId],
    ) -> Result<()> {
        let record = ValidationRecord {
            object_id: object_id.clone(),
            dataset_template_id: template_id,
            validation_metadata: metadata.to_json(),
            supporters: supporters.to_vec(),
            registered_at: Utc::now(),
        };
        let path = self.validation_path(object_id)?;
        ensure_parent(&path)?;
        fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
        info!(object = %object_id, template_id, "Validation registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_template_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let service = LocalProjectService::new(dir.path());
        service.put_template(7, &json!({"root": {}}))?;

        let details = service.get_dataset_template_details(7)?;
        assert_eq!(details.rules, json!({"root": {}}));
        assert!(matches!(
            service.get_dataset_template_details(8),
            Err(ProcessingError::Remote(_))
        ));
        Ok(())
    }

    #[test]
    fn test_objects_and_registration() -> Result<()> {
        let dir = TempDir::new()?;
        let service = LocalProjectService::new(dir.path());

        let id = service.replace_file_content("project/a.csv", &mut "x,y\n".as_bytes())?;
        assert_eq!(fs::read_to_string(service.object_path(&id)?)?, "x,y\n");
        assert_eq!(service.get_filename_dataset_type("project/a.csv")?, None);

        let mut metadata = ValidationMetadata::new("year");
        metadata.time_range.observe(2000.0);
        service.register_validation(&id, 3, &metadata, &["a.csv.parquet".to_string()])?;

        assert_eq!(service.get_filename_dataset_type("project/a.csv")?, Some(3));
        let details = service.get_filename_validation_details("project/a.csv")?;
        assert_eq!(details.dataset_template_id, 3);
        assert_eq!(details.validation_metadata["year_meta"]["min_value"], json!(2000.0));

        let record = service.validation_record("project/a.csv")?.unwrap();
        assert_eq!(record.supporters, vec!["a.csv.parquet".to_string()]);
        Ok(())
    }

    #[test]
    fn test_names_cannot_escape_store() {
        let dir = TempDir::new().unwrap();
        let service = LocalProjectService::new(dir.path());
        let result = service.replace_file_content("../outside.csv", &mut "x".as_bytes());
        assert!(matches!(result, Err(ProcessingError::Remote(_))));
    }
}
