/// Directory names
pub const INPUT_DIRECTORY: &str = "inputs";
pub const INPUT_PREFIX: &str = "inputs/";
pub const JOB_OUTPUTS_DIRECTORY: &str = "job-outputs";
pub const PLACEHOLDER_FILE: &str = ".gitkeep";

/// Temporary artifact suffixes
pub const VALIDATED_SUFFIX: &str = "_validation.csv";
pub const SORTED_SUFFIX: &str = "_sorted.csv";
pub const PARQUET_EXTENSION: &str = "parquet";

/// Processing limits
pub const HARVEST_LIMIT: usize = 1000;
pub const ERROR_LIMIT: usize = 50;
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const MERGE_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB
pub const MIN_MERGE_FILES: usize = 2;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
