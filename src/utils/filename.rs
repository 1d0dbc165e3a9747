use crate::utils::constants::{
    INPUT_PREFIX, JOB_OUTPUTS_DIRECTORY, PARQUET_EXTENSION, SORTED_SUFFIX, VALIDATED_SUFFIX,
};
use std::path::{Path, PathBuf};

/// Everything before the first `.csv` in the path, or the whole path.
fn csv_stem(input: &Path) -> String {
    let text = input.to_string_lossy();
    match text.find(".csv") {
        Some(index) => text[..index].to_string(),
        None => text.into_owned(),
    }
}

/// `data/x.csv` -> `data/x_validation.csv`
pub fn validated_path(input: &Path) -> PathBuf {
    PathBuf::from(format!("{}{}", csv_stem(input), VALIDATED_SUFFIX))
}

/// `data/x.csv` -> `data/x_sorted.csv`
pub fn sorted_path(input: &Path) -> PathBuf {
    PathBuf::from(format!("{}{}", csv_stem(input), SORTED_SUFFIX))
}

/// Columnar companion of a CSV file: the same path with `.parquet` appended.
pub fn parquet_companion(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(PARQUET_EXTENSION);
    PathBuf::from(name)
}

/// Remote object name of a local input: the `inputs/` prefix is dropped.
pub fn remote_name(input: &str) -> String {
    let normalized = input.replace('\\', "/");
    match normalized.strip_prefix(INPUT_PREFIX) {
        Some(rest) => rest.to_string(),
        None => normalized,
    }
}

/// Remote name of the Parquet supporter written next to a validated input.
/// The leading directory component of the remote name is dropped.
pub fn validation_supporter_name(input: &str) -> String {
    let companion = format!("{}.{}", remote_name(input), PARQUET_EXTENSION);
    let skip = if companion.starts_with('/') { 2 } else { 1 };
    let parts: Vec<&str> = companion.split('/').collect();
    if parts.len() <= skip {
        return companion;
    }
    parts[skip..].join("/")
}

pub fn merge_output_name(output: &str) -> String {
    format!("{}.csv", output)
}

pub fn merge_supporter_name(job_id: &str, output: &str) -> String {
    format!(
        "{}/{}/{}.{}",
        JOB_OUTPUTS_DIRECTORY, job_id, output, PARQUET_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_paths() {
        let input = Path::new("inputs/project/emissions.csv");
        assert_eq!(
            validated_path(input),
            PathBuf::from("inputs/project/emissions_validation.csv")
        );
        assert_eq!(
            sorted_path(input),
            PathBuf::from("inputs/project/emissions_sorted.csv")
        );
        assert_eq!(
            parquet_companion(&sorted_path(input)),
            PathBuf::from("inputs/project/emissions_sorted.csv.parquet")
        );
    }

    #[test]
    fn test_path_without_csv_extension() {
        let input = Path::new("inputs/data.txt");
        assert_eq!(validated_path(input), PathBuf::from("inputs/data.txt_validation.csv"));
    }

    #[test]
    fn test_remote_names() {
        assert_eq!(remote_name("inputs/project/emissions.csv"), "project/emissions.csv");
        assert_eq!(remote_name("elsewhere/emissions.csv"), "elsewhere/emissions.csv");
        assert_eq!(
            validation_supporter_name("inputs/project/sub/emissions.csv"),
            "sub/emissions.csv.parquet"
        );
        assert_eq!(
            validation_supporter_name("inputs/emissions.csv"),
            "emissions.csv.parquet"
        );
    }

    #[test]
    fn test_merge_names() {
        assert_eq!(merge_output_name("combined"), "combined.csv");
        assert_eq!(
            merge_supporter_name("42", "combined"),
            "job-outputs/42/combined.parquet"
        );
    }
}
