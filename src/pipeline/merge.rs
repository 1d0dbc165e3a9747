use crate::error::{ProcessingError, Result};
use crate::models::{TemplateId, TemplateRules, ValidationMetadata};
use crate::pipeline::{remove_temporaries, validate_rows, InputFile};
use crate::processors::{
    check_same_template_type, FileMerger, MergeSummary, MetadataAggregator, RowValidator,
};
use crate::readers::CsvRowReader;
use crate::services::{ObjectId, ProjectService};
use crate::utils::{merge_output_name, merge_supporter_name, parquet_companion, ProgressReporter};
use crate::writers::{column_specs, ColumnarWriter};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub merged: MergeSummary,
    pub template_id: Option<TemplateId>,
    pub metadata: Option<ValidationMetadata>,
    pub rows_written: usize,
    pub object_id: Option<ObjectId>,
    pub supporter_id: Option<ObjectId>,
}

impl MergeOutcome {
    pub fn summary(&self) -> String {
        format!(
            "Merge Summary:\n\
            - Files merged: {}\n\
            - Output: {}\n\
            - Rows in columnar artifact: {}\n\
            - Registered: {}",
            self.merged.files_merged,
            self.merged.output.display(),
            self.rows_written,
            self.object_id.as_deref().unwrap_or("no")
        )
    }
}

/// Everything the registration step needs, gathered before any file is touched.
struct MergePlan {
    rules: TemplateRules,
    metadata: ValidationMetadata,
    job_id: String,
}

/// Concatenates validated files of one template into the first of them and
/// registers the result as a job output.
pub struct MergeJob<'a> {
    service: &'a dyn ProjectService,
    inputs: Vec<InputFile>,
    output_name: String,
    job_id: Option<String>,
    merge_only: bool,
    silent: bool,
}

impl<'a> MergeJob<'a> {
    pub fn new(service: &'a dyn ProjectService, inputs: Vec<InputFile>, output_name: &str) -> Self {
        Self {
            service,
            inputs,
            output_name: output_name.trim().to_string(),
            job_id: None,
            merge_only: false,
            silent: false,
        }
    }

    pub fn with_job_id(mut self, job_id: Option<String>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_merge_only(mut self, merge_only: bool) -> Self {
        self.merge_only = merge_only;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn run(&self) -> Result<MergeOutcome> {
        if self.output_name.is_empty() {
            return Err(ProcessingError::MergePrecondition(
                "Filename for merged file is required.".to_string(),
            ));
        }

        let remote_names: Vec<String> = self.inputs.iter().map(InputFile::remote_name).collect();
        check_same_template_type(self.service, &remote_names)?;

        let merger = FileMerger::new();
        let locals: Vec<PathBuf> = self.inputs.iter().map(|i| i.local.clone()).collect();
        merger.check_headers(&locals)?;

        let plan = if self.merge_only {
            None
        } else {
            Some(self.plan(&remote_names)?)
        };

        let merged = merger.merge(&locals)?;

        let Some(plan) = plan else {
            println!("Merge complete. Validation of merge not registered in server as MERGE_ONLY is set.");
            return Ok(MergeOutcome {
                merged,
                template_id: None,
                metadata: None,
                rows_written: 0,
                object_id: None,
                supporter_id: None,
            });
        };

        let parquet = parquet_companion(&merged.output);
        let result = self.register(&plan, &merged, &parquet);
        remove_temporaries(&[&parquet]);
        let (rows_written, object_id, supporter_id) = result?;

        println!("Merge complete");
        Ok(MergeOutcome {
            merged,
            template_id: Some(plan.rules.template_id()),
            metadata: Some(plan.metadata),
            rows_written,
            object_id: Some(object_id),
            supporter_id,
        })
    }

    /// Resolve the template from the first file and merge per-file metadata.
    fn plan(&self, remote_names: &[String]) -> Result<MergePlan> {
        let job_id = self
            .job_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ProcessingError::MergePrecondition("JOB_ID is required to register a merge".to_string())
            })?;

        let details = remote_names
            .iter()
            .map(|name| self.service.get_filename_validation_details(name))
            .collect::<Result<Vec<_>>>()?;

        let template_id = details[0].dataset_template_id;
        let template = self.service.get_dataset_template_details(template_id)?;
        let rules = TemplateRules::from_value(template_id, template.rules)?;

        let metadata = MetadataAggregator::new(rules.time_dimension()).merge_documents(
            remote_names
                .iter()
                .map(String::as_str)
                .zip(details.iter().map(|d| &d.validation_metadata)),
        )?;

        info!(
            template_id,
            files = remote_names.len(),
            "Aggregated validation metadata"
        );
        Ok(MergePlan {
            rules,
            metadata,
            job_id,
        })
    }

    /// Re-validate the merged file into its columnar artifact, then upload both
    /// and register. Any rejected row fails the whole merge.
    fn register(
        &self,
        plan: &MergePlan,
        merged: &MergeSummary,
        parquet: &Path,
    ) -> Result<(usize, ObjectId, Option<ObjectId>)> {
        let headers = plan.rules.validated_headers()?;
        let mut rows = CsvRowReader::new().open(&merged.output)?;
        let validator = RowValidator::new(&plan.rules);
        let mut columnar = ColumnarWriter::new(parquet, column_specs(&plan.rules, &headers));
        let progress = ProgressReporter::new_spinner("Re-validating merged file", self.silent);

        let errors = validate_rows(&mut rows, &validator, &progress, |row| columnar.push(row))?;
        if errors.has_rejections() {
            progress.finish_with_message("Invalid data detected");
            println!("{}", errors.report());
            return Err(ProcessingError::InvalidData {
                file: merged.output.display().to_string(),
                rejected_rows: errors.rejected_rows(),
            });
        }
        let columnar = columnar.finish()?;
        let rows_written = columnar.as_ref().map_or(0, |c| c.rows_written);
        progress.finish_with_message(&format!("Re-validated {} rows", rows_written));

        let object_id = self.service.add_filestream_as_job_output(
            &merge_output_name(&self.output_name),
            &mut File::open(&merged.output)?,
        )?;

        let supporter_id = match columnar {
            Some(_) => Some(self.service.add_filestream_as_validation_supporter(
                &merge_supporter_name(&plan.job_id, &self.output_name),
                &mut File::open(parquet)?,
            )?),
            None => None,
        };

        let supporters: Vec<ObjectId> = supporter_id.iter().cloned().collect();
        self.service.register_validation(
            &object_id,
            plan.rules.template_id(),
            &plan.metadata,
            &supporters,
        )?;

        Ok((rows_written, object_id, supporter_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::fixtures::rules_document;
    use crate::services::LocalProjectService;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "region,variable,unit,year,value\n";

    fn workspace(files: &[(&str, &str)]) -> (TempDir, LocalProjectService, Vec<InputFile>) {
        let dir = TempDir::new().unwrap();
        let service = LocalProjectService::new(dir.path().join("store"));
        service.put_template(1, &rules_document()).unwrap();

        let inputs = files
            .iter()
            .map(|(name, body)| {
                let input = InputFile::new(dir.path(), format!("inputs/{}", name));
                fs::create_dir_all(input.local.parent().unwrap()).unwrap();
                fs::write(&input.local, format!("{}{}", HEADER, body)).unwrap();
                input
            })
            .collect();
        (dir, service, inputs)
    }

    fn register(service: &LocalProjectService, name: &str, metadata: serde_json::Value) {
        let parsed = ValidationMetadata::from_json("year", &metadata).unwrap();
        service
            .register_validation(&name.to_string(), 1, &parsed, &[])
            .unwrap();
    }

    #[test]
    fn test_merge_only_skips_registration() -> Result<()> {
        let (_dir, service, inputs) = workspace(&[
            ("a.csv", "AT,GDP,USD,2000,1"),
            ("b.csv", "DE,GDP,USD,2001,2\n"),
        ]);

        let outcome = MergeJob::new(&service, inputs.clone(), "combined")
            .with_merge_only(true)
            .with_silent(true)
            .run()?;

        assert!(outcome.object_id.is_none());
        assert_eq!(
            fs::read_to_string(&inputs[0].local)?,
            format!("{}AT,GDP,USD,2000,1\nDE,GDP,USD,2001,2\n", HEADER)
        );
        Ok(())
    }

    #[test]
    fn test_merge_registers_aggregated_metadata() -> Result<()> {
        let (_dir, service, inputs) = workspace(&[
            ("a.csv", "AT,GDP,USD,2000,1\n"),
            ("b.csv", "DE,GDP,USD,2010,2\n"),
        ]);
        register(&service, "a.csv", serde_json::json!({"year_meta": {"min_value": 2000, "max_value": 2000}, "region": ["AT"]}));
        register(&service, "b.csv", serde_json::json!({"year_meta": {"min_value": 2010, "max_value": 2010}, "region": ["DE"]}));

        let outcome = MergeJob::new(&service, inputs, "combined")
            .with_job_id(Some("17".to_string()))
            .with_silent(true)
            .run()?;

        assert_eq!(outcome.rows_written, 2);
        assert_eq!(outcome.object_id.as_deref(), Some("combined.csv"));
        assert_eq!(outcome.supporter_id.as_deref(), Some("job-outputs/17/combined.parquet"));

        let record = service.validation_record("combined.csv")?.unwrap();
        assert_eq!(record.validation_metadata["year_meta"]["min_value"], serde_json::json!(2000.0));
        assert_eq!(record.validation_metadata["year_meta"]["max_value"], serde_json::json!(2010.0));
        assert_eq!(record.validation_metadata["region"], serde_json::json!(["AT", "DE"]));
        assert!(service.object_path("job-outputs/17/combined.parquet")?.exists());
        Ok(())
    }

    #[test]
    fn test_missing_job_id_fails_before_merging() -> Result<()> {
        let (_dir, service, inputs) = workspace(&[("a.csv", "AT,GDP,USD,2000,1\n"), ("b.csv", "")]);
        register(&service, "a.csv", serde_json::json!({"year_meta": {}}));
        register(&service, "b.csv", serde_json::json!({"year_meta": {}}));

        let err = MergeJob::new(&service, inputs.clone(), "combined")
            .with_silent(true)
            .run()
            .unwrap_err();

        assert!(matches!(err, ProcessingError::MergePrecondition(_)));
        assert_eq!(
            fs::read_to_string(&inputs[0].local)?,
            format!("{}AT,GDP,USD,2000,1\n", HEADER)
        );
        Ok(())
    }

    #[test]
    fn test_output_name_is_required() {
        let (_dir, service, inputs) = workspace(&[("a.csv", ""), ("b.csv", "")]);
        let err = MergeJob::new(&service, inputs, "  ").run().unwrap_err();
        assert!(matches!(err, ProcessingError::MergePrecondition(_)));
    }
}
