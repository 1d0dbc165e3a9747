use crate::error::{ProcessingError, Result};
use crate::models::TemplateId;
use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize)]
struct EnvironmentSettings {
    verify_only: Option<String>,
    merge_only: Option<String>,
    job_id: Option<String>,
    dataset_template_id: Option<String>,
    merged_filename: Option<String>,
}

/// Job toggles read from the process environment.
///
/// `VERIFY_ONLY` and `MERGE_ONLY` accept `1`, `true`, `yes` or `on` in any
/// case; anything else, or absence, is false.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSettings {
    pub verify_only: bool,
    pub merge_only: bool,
    pub job_id: Option<String>,
    pub dataset_template_id: Option<TemplateId>,
    pub merged_filename: Option<String>,
}

impl JobSettings {
    pub fn from_env() -> Result<Self> {
        Self::load(Environment::default())
    }

    /// Read settings from an explicit variable map instead of the process
    /// environment.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::load(Environment::default().source(Some(vars)))
    }

    fn load(environment: Environment) -> Result<Self> {
        let raw: EnvironmentSettings = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        let dataset_template_id = raw
            .dataset_template_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| {
                v.parse::<TemplateId>().map_err(|_| {
                    ProcessingError::Config(ConfigError::Message(format!(
                        "DATASET_TEMPLATE_ID must be a non-negative integer, got '{}'",
                        v
                    )))
                })
            })
            .transpose()?;

        Ok(Self {
            verify_only: raw.verify_only.as_deref().map_or(false, is_truthy),
            merge_only: raw.merge_only.as_deref().map_or(false, is_truthy),
            job_id: non_empty(raw.job_id),
            dataset_template_id,
            merged_filename: non_empty(raw.merged_filename),
        })
    }

    pub fn job_id(&self) -> Result<&str> {
        self.job_id.as_deref().ok_or_else(|| {
            ProcessingError::Config(ConfigError::Message("JOB_ID is not set".to_string()))
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_unset() -> Result<()> {
        let settings = JobSettings::from_map(HashMap::new())?;
        assert_eq!(settings, JobSettings::default());
        assert!(settings.job_id().is_err());
        Ok(())
    }

    #[test]
    fn test_reads_toggles_and_ids() -> Result<()> {
        let settings = JobSettings::from_map(vars(&[
            ("VERIFY_ONLY", "TRUE"),
            ("MERGE_ONLY", "0"),
            ("JOB_ID", "job-17"),
            ("DATASET_TEMPLATE_ID", "42"),
            ("MERGED_FILENAME", "combined"),
        ]))?;

        assert!(settings.verify_only);
        assert!(!settings.merge_only);
        assert_eq!(settings.job_id()?, "job-17");
        assert_eq!(settings.dataset_template_id, Some(42));
        assert_eq!(settings.merged_filename.as_deref(), Some("combined"));
        Ok(())
    }

    #[test]
    fn test_bad_template_id() {
        let err = JobSettings::from_map(vars(&[("DATASET_TEMPLATE_ID", "abc")])).unwrap_err();
        assert!(matches!(err, ProcessingError::Config(_)));
    }

    #[test]
    fn test_truthy_values() {
        for value in ["1", "true", "True", "YES", "on "] {
            assert!(is_truthy(value), "{}", value);
        }
        for value in ["", "0", "false", "off", "no"] {
            assert!(!is_truthy(value), "{}", value);
        }
    }
}
