use crate::cli::args::{Cli, Commands};
use crate::error::ProcessingError;
use crate::pipeline::{discover_inputs, InputFile, MergeJob, ValidationJob};
use crate::services::LocalProjectService;
use crate::settings::JobSettings;
use crate::writers::get_file_info;
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(&cli);

    let settings = JobSettings::from_env().context("Failed to read job settings from environment")?;
    debug!(?settings, "Loaded job settings");

    let workspace = cli.workspace.clone();
    let store = cli.store_dir();
    let silent = cli.quiet;

    match cli.command {
        Commands::Validate {
            template_id,
            fieldnames,
            verify_only,
            compression,
            batch_size,
            files,
        } => {
            let template_id = template_id
                .or(settings.dataset_template_id)
                .ok_or_else(|| anyhow!("A dataset template id is required (--template-id or DATASET_TEMPLATE_ID)"))?;
            let verify_only = verify_only || settings.verify_only;
            let inputs = resolve_inputs(&workspace, files)?;

            println!("Validating {} file(s) against template {}", inputs.len(), template_id);
            println!("Project store: {}", store.display());

            let failed = run_blocking(move || {
                let service = LocalProjectService::new(store);
                let mut failed = 0usize;

                for input in inputs {
                    let name = input.name.clone();
                    let outcome = ValidationJob::new(&service, template_id, input)
                        .with_fieldnames(fieldnames.clone())
                        .with_verify_only(verify_only)
                        .with_compression(&compression)
                        .with_batch_size(batch_size)
                        .with_silent(silent)
                        .run();

                    match outcome {
                        Ok(outcome) => println!("\n{}", outcome.summary()),
                        Err(e) => {
                            error!(input = %name, error = %e, "Validation failed");
                            println!("\n{}: {}", name, e);
                            failed += 1;
                        }
                    }
                }
                failed
            })
            .await
            .context("Validation task did not complete")?;

            if failed > 0 {
                bail!("{} file(s) failed validation", failed);
            }
        }

        Commands::Merge {
            output_name,
            job_id,
            merge_only,
            files,
        } => {
            let output_name = output_name
                .or_else(|| settings.merged_filename.clone())
                .unwrap_or_default();
            let job_id = job_id.or_else(|| settings.job_id.clone());
            let merge_only = merge_only || settings.merge_only;
            let inputs = resolve_inputs(&workspace, files)?;

            println!("Merging {} file(s) into {}", inputs.len(), output_name);

            let outcome = run_blocking(move || {
                let service = LocalProjectService::new(store);
                MergeJob::new(&service, inputs, &output_name)
                    .with_job_id(job_id)
                    .with_merge_only(merge_only)
                    .with_silent(silent)
                    .run()
            })
            .await
            .context("Merge task did not complete")??;

            println!("\n{}", outcome.summary());
        }

        Commands::Info { file } => {
            println!("Analyzing Parquet file: {}", file.display());
            let info = get_file_info(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("\n{}", info.summary());
        }
    }

    Ok(())
}

/// Run a blocking job on tokio's blocking pool.
async fn run_blocking<T, F>(job: F) -> std::result::Result<T, ProcessingError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(ProcessingError::TaskJoin)
}

/// Explicit files are taken relative to the workspace; with none given, the
/// workspace's `inputs/` tree is used.
fn resolve_inputs(workspace: &Path, files: Vec<PathBuf>) -> Result<Vec<InputFile>> {
    if files.is_empty() {
        let found = discover_inputs(workspace)
            .with_context(|| format!("Failed to scan inputs under {}", workspace.display()))?;
        if found.is_empty() {
            bail!("No input files found under {}", workspace.join("inputs").display());
        }
        return Ok(found);
    }
    Ok(files
        .into_iter()
        .map(|file| InputFile::new(workspace, file))
        .collect())
}

fn setup_logging(cli: &Cli) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level = cli.get_log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("regional_ts_processor={}", log_level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init();

    debug!("Logging initialized at level: {}", log_level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocking_job_result_is_returned() {
        assert_eq!(run_blocking(|| 2 + 2).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_panicking_job_surfaces_as_task_error() {
        let err = run_blocking(|| -> usize { panic!("job failed") })
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::TaskJoin(_)));
        assert!(err.to_string().starts_with("Async task error"));
    }
}
