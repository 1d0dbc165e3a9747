use crate::models::TemplateId;
use crate::utils::constants::DEFAULT_BATCH_SIZE;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "regional-ts")]
#[command(about = "Validate and merge regional time-series CSV datasets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, action = ArgAction::Count, help = "Increase logging verbosity (-v, -vv, -vvv)")]
    pub verbose: u8,

    #[arg(short, long, global = true, help = "Suppress progress output and informational logs")]
    pub quiet: bool,

    #[arg(
        short,
        long,
        global = true,
        default_value = ".",
        help = "Workspace directory; relative input paths and inputs/ are resolved against it"
    )]
    pub workspace: PathBuf,

    #[arg(long, global = true, help = "Project store directory [default: <workspace>/project]")]
    pub store: Option<PathBuf>,
}

impl Cli {
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| self.workspace.join("project"))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate CSV files against a dataset template and register them
    Validate {
        #[arg(short, long, help = "Dataset template id [default: $DATASET_TEMPLATE_ID]")]
        template_id: Option<TemplateId>,

        #[arg(
            long,
            value_delimiter = ',',
            help = "Column names for header-less files (comma separated)"
        )]
        fieldnames: Option<Vec<String>>,

        #[arg(long, help = "Validate only; do not sort, upload or register [env: VERIFY_ONLY]")]
        verify_only: bool,

        #[arg(short, long, default_value = "snappy")]
        compression: String,

        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[arg(help = "Input files relative to the workspace [default: every file under inputs/]")]
        files: Vec<PathBuf>,
    },

    /// Merge validated files of one template into the first file and register it
    Merge {
        #[arg(short, long, help = "Name of the merged output [default: $MERGED_FILENAME]")]
        output_name: Option<String>,

        #[arg(long, help = "Job id used to name the columnar supporter [default: $JOB_ID]")]
        job_id: Option<String>,

        #[arg(long, help = "Merge only; do not re-validate or register [env: MERGE_ONLY]")]
        merge_only: bool,

        #[arg(help = "Input files relative to the workspace [default: every file under inputs/]")]
        files: Vec<PathBuf>,
    },

    /// Display information about a Parquet artifact
    Info {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from([
            "regional-ts",
            "-vv",
            "--workspace",
            "/tmp/ws",
            "validate",
            "--template-id",
            "12",
            "--fieldnames",
            "region,year,value",
            "inputs/a.csv",
        ]);

        assert_eq!(cli.get_log_level(), "debug");
        assert_eq!(cli.store_dir(), PathBuf::from("/tmp/ws/project"));
        match cli.command {
            Commands::Validate {
                template_id,
                fieldnames,
                verify_only,
                files,
                ..
            } => {
                assert_eq!(template_id, Some(12));
                assert_eq!(
                    fieldnames,
                    Some(vec!["region".to_string(), "year".to_string(), "value".to_string()])
                );
                assert!(!verify_only);
                assert_eq!(files, vec![PathBuf::from("inputs/a.csv")]);
            }
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn test_parse_merge_quiet() {
        let cli = Cli::parse_from(["regional-ts", "merge", "-o", "combined", "--merge-only", "--quiet"]);
        assert_eq!(cli.get_log_level(), "error");
        assert!(matches!(
            cli.command,
            Commands::Merge { merge_only: true, ref output_name, .. } if output_name.as_deref() == Some("combined")
        ));
    }
}
