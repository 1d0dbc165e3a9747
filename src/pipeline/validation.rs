use crate::error::{ProcessingError, Result};
use crate::models::{TemplateId, TemplateRules, ValidationMetadata};
use crate::pipeline::{remove_temporaries, validate_rows, InputFile};
use crate::processors::{MetadataCollector, RowValidator, SortStage};
use crate::readers::{CsvRowReader, ReaderStats};
use crate::services::{ObjectId, ProjectService};
use crate::utils::constants::{COMPRESSION_SNAPPY, DEFAULT_BATCH_SIZE};
use crate::utils::{
    parquet_companion, sorted_path, validated_path, validation_supporter_name, ProgressReporter,
};
use crate::writers::{column_specs, ColumnarWriter, ValidatedCsvWriter};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What a validation run produced.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub input: String,
    pub template_id: TemplateId,
    pub rows_accepted: usize,
    pub reader_stats: ReaderStats,
    pub metadata: ValidationMetadata,
    pub truncated_columns: Vec<String>,
    pub object_id: Option<ObjectId>,
    pub supporter_id: Option<ObjectId>,
}

impl ValidationOutcome {
    pub fn registered(&self) -> bool {
        self.object_id.is_some()
    }

    pub fn summary(&self) -> String {
        let range = &self.metadata.time_range;
        let time = if range.is_empty() {
            "no rows".to_string()
        } else {
            format!("{} to {}", range.min_value, range.max_value)
        };
        format!(
            "Validation Summary for {}:\n\
            - Template: {}\n\
            - Rows accepted: {}\n\
            - {}: {}\n\
            - Reader: {}\n\
            - Registered: {}",
            self.input,
            self.template_id,
            self.rows_accepted,
            self.metadata.time_dimension(),
            time,
            self.reader_stats.summary(),
            match &self.object_id {
                Some(id) => id.as_str(),
                None => "no",
            }
        )
    }
}

/// Validates one CSV input against a dataset template and, unless only
/// verifying, sorts it, replaces the stored object and registers the result.
pub struct ValidationJob<'a> {
    service: &'a dyn ProjectService,
    template_id: TemplateId,
    input: InputFile,
    fieldnames: Option<Vec<String>>,
    delimiter: u8,
    verify_only: bool,
    batch_size: usize,
    compression: String,
    silent: bool,
}

struct Artifacts {
    validated: PathBuf,
    sorted: PathBuf,
    parquet: PathBuf,
}

impl Artifacts {
    fn for_input(input: &Path) -> Self {
        let sorted = sorted_path(input);
        Self {
            validated: validated_path(input),
            parquet: parquet_companion(&sorted),
            sorted,
        }
    }

    fn remove(&self) {
        remove_temporaries(&[&self.validated, &self.sorted, &self.parquet]);
    }
}

impl<'a> ValidationJob<'a> {
    pub fn new(service: &'a dyn ProjectService, template_id: TemplateId, input: InputFile) -> Self {
        Self {
            service,
            template_id,
            input,
            fieldnames: None,
            delimiter: b',',
            verify_only: false,
            batch_size: DEFAULT_BATCH_SIZE,
            compression: COMPRESSION_SNAPPY.to_string(),
            silent: false,
        }
    }

    pub fn with_fieldnames(mut self, fieldnames: Option<Vec<String>>) -> Self {
        self.fieldnames = fieldnames;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_verify_only(mut self, verify_only: bool) -> Self {
        self.verify_only = verify_only;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_compression(mut self, compression: &str) -> Self {
        self.compression = compression.to_string();
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn run(&self) -> Result<ValidationOutcome> {
        let details = self.service.get_dataset_template_details(self.template_id)?;
        let rules = TemplateRules::from_value(self.template_id, details.rules)?;
        let headers = rules.validated_headers()?;
        let artifacts = Artifacts::for_input(&self.input.local);

        info!(input = %self.input.name, template_id = self.template_id, "Validating file");

        let outcome = match self.validate(&rules, &headers, &artifacts) {
            Ok(outcome) => outcome,
            Err(e) => {
                artifacts.remove();
                return Err(e);
            }
        };

        if self.verify_only {
            artifacts.remove();
            println!("Validation complete. Validation not registered in server as VERIFY_ONLY is set.");
            return Ok(outcome);
        }

        let registered = self.sort_and_register(&rules, &headers, &artifacts, outcome);
        artifacts.remove();
        registered
    }

    fn validate(
        &self,
        rules: &TemplateRules,
        headers: &[String],
        artifacts: &Artifacts,
    ) -> Result<ValidationOutcome> {
        let mut rows = CsvRowReader::new()
            .with_delimiter(self.delimiter)
            .with_fieldnames(self.fieldnames.clone())
            .open(&self.input.local)?;

        let validator = RowValidator::new(rules);
        let mut collector = MetadataCollector::new(rules);
        let mut csv = ValidatedCsvWriter::create(&artifacts.validated, headers)?;
        let mut columnar = ColumnarWriter::new(&artifacts.parquet, column_specs(rules, headers))
            .with_compression(&self.compression)?
            .with_batch_size(self.batch_size);

        let progress = ProgressReporter::new_spinner(
            &format!("Validating {}", self.input.name),
            self.silent,
        );
        let mut rows_accepted = 0usize;

        let errors = validate_rows(&mut rows, &validator, &progress, |row| {
            collector.observe(row)?;
            csv.write_row(row.raw())?;
            columnar.push(row)?;
            rows_accepted += 1;
            Ok(())
        })?;

        let reader_stats = rows.stats().clone();
        info!(input = %self.input.name, "{}", reader_stats.summary());

        if errors.has_rejections() {
            progress.finish_with_message("Invalid data detected");
            println!("{}", errors.report());
            return Err(ProcessingError::InvalidData {
                file: self.input.name.clone(),
                rejected_rows: errors.rejected_rows(),
            });
        }

        csv.finish()?;
        if let Some(summary) = columnar.finish()? {
            info!(rows = summary.rows_written, path = %summary.path.display(), "Columnar artifact written");
        }
        progress.finish_with_message(&format!("Validated {} rows", rows_accepted));
        println!("File validated against rules.");

        let truncated_columns: Vec<String> =
            collector.truncated_columns().map(str::to_string).collect();
        for column in &truncated_columns {
            warn!(column = %column, "Distinct values capped, metadata for this column is incomplete");
        }

        Ok(ValidationOutcome {
            input: self.input.name.clone(),
            template_id: self.template_id,
            rows_accepted,
            reader_stats,
            metadata: collector.finish(),
            truncated_columns,
            object_id: None,
            supporter_id: None,
        })
    }

    fn sort_and_register(
        &self,
        rules: &TemplateRules,
        headers: &[String],
        artifacts: &Artifacts,
        mut outcome: ValidationOutcome,
    ) -> Result<ValidationOutcome> {
        SortStage::for_headers(headers, rules.time_dimension())
            .with_delimiter(b',')
            .run(&artifacts.validated, &artifacts.sorted)?;
        println!("Validated file sorted");

        let remote = self.input.remote_name();
        let object_id = self
            .service
            .replace_file_content(&remote, &mut File::open(&artifacts.sorted)?)?;
        println!("File replaced");

        let mut supporters = Vec::new();
        if artifacts.parquet.exists() {
            let supporter = self.service.add_filestream_as_validation_supporter(
                &validation_supporter_name(&self.input.name),
                &mut File::open(&artifacts.parquet)?,
            )?;
            supporters.push(supporter);
        }

        self.service
            .register_validation(&object_id, self.template_id, &outcome.metadata, &supporters)?;
        println!("Validation complete");

        outcome.supporter_id = supporters.into_iter().next();
        outcome.object_id = Some(object_id);
        Ok(outcome)
    }
}
