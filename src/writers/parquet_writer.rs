use crate::error::{ProcessingError, Result};
use crate::models::{coerce_number, FieldValue, TemplateRules, ValidatedRow};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_BATCH_SIZE,
};
use arrow::array::{
    ArrayBuilder, ArrayRef, Float32Builder, ListBuilder, StringBuilder, StringDictionaryBuilder,
};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Physical encoding of one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// The value dimension.
    Float32,
    /// Declared array fields.
    StringList,
    /// Everything else, dictionary-encoded with `Int32` keys.
    Dictionary,
}

impl ColumnKind {
    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Float32 => DataType::Float32,
            ColumnKind::StringList => {
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
            }
            ColumnKind::Dictionary => {
                DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Columns for `headers`, typed from the template.
pub fn column_specs(rules: &TemplateRules, headers: &[String]) -> Vec<ColumnSpec> {
    headers
        .iter()
        .map(|name| {
            let kind = if name == rules.value_dimension() {
                ColumnKind::Float32
            } else if rules.schema().property(name).map_or(false, |p| p.is_array()) {
                ColumnKind::StringList
            } else {
                ColumnKind::Dictionary
            };
            ColumnSpec {
                name: name.clone(),
                kind,
            }
        })
        .collect()
}

enum ColumnBuilder {
    Float32(Float32Builder),
    StringList(ListBuilder<StringBuilder>),
    Dictionary(StringDictionaryBuilder<Int32Type>),
}

impl ColumnBuilder {
    fn new(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Float32 => ColumnBuilder::Float32(Float32Builder::new()),
            ColumnKind::StringList => ColumnBuilder::StringList(ListBuilder::new(StringBuilder::new())),
            ColumnKind::Dictionary => ColumnBuilder::Dictionary(StringDictionaryBuilder::new()),
        }
    }

    fn append(&mut self, name: &str, row: &ValidatedRow) -> Result<()> {
        match self {
            ColumnBuilder::Float32(builder) => {
                let cell = row.raw().get(name).unwrap_or_default().trim();
                if cell.is_empty() {
                    builder.append_null();
                } else {
                    let value = coerce_number(cell).ok_or_else(|| {
                        ProcessingError::InvalidFormat(format!(
                            "value '{}' in column '{}' is not a number",
                            cell, name
                        ))
                    })?;
                    builder.append_value(value as f32);
                }
            }
            ColumnBuilder::StringList(builder) => {
                match row.get(name) {
                    Some(FieldValue::List(items)) => {
                        for item in items {
                            builder.values().append_value(item);
                        }
                    }
                    Some(FieldValue::Scalar(value)) => builder.values().append_value(value),
                    None => {}
                }
                builder.append(true);
            }
            ColumnBuilder::Dictionary(builder) => match row.raw().get(name) {
                Some(value) => {
                    builder.append(value)?;
                }
                None => builder.append_null(),
            },
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Float32(builder) => Arc::new(builder.finish()),
            ColumnBuilder::StringList(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Dictionary(builder) => Arc::new(builder.finish()),
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnBuilder::Float32(builder) => builder.len(),
            ColumnBuilder::StringList(builder) => builder.len(),
            ColumnBuilder::Dictionary(builder) => builder.len(),
        }
    }
}

/// Streams validated rows into a Parquet file in fixed-size batches.
///
/// The file is created on the first flushed batch, so a run that accepts no
/// rows leaves nothing behind. Row order is preserved.
pub struct ColumnarWriter {
    path: PathBuf,
    columns: Vec<ColumnSpec>,
    schema: SchemaRef,
    builders: Vec<ColumnBuilder>,
    compression: Compression,
    batch_size: usize,
    writer: Option<ArrowWriter<File>>,
    rows_written: usize,
    batches_written: usize,
}

impl ColumnarWriter {
    pub fn new(path: impl Into<PathBuf>, columns: Vec<ColumnSpec>) -> Self {
        let fields: Vec<Field> = columns
            .iter()
            .map(|c| Field::new(&c.name, c.kind.data_type(), true))
            .collect();
        let builders = columns.iter().map(|c| ColumnBuilder::new(c.kind)).collect();

        Self {
            path: path.into(),
            columns,
            schema: Arc::new(Schema::new(fields)),
            builders,
            compression: Compression::SNAPPY,
            batch_size: DEFAULT_BATCH_SIZE,
            writer: None,
            rows_written: 0,
            batches_written: 0,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = parse_compression(compression)?;
        Ok(self)
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn push(&mut self, row: &ValidatedRow) -> Result<()> {
        for (builder, column) in self.builders.iter_mut().zip(&self.columns) {
            builder.append(&column.name, row)?;
        }
        if self.pending_rows() >= self.batch_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn pending_rows(&self) -> usize {
        self.builders.first().map_or(0, ColumnBuilder::len)
    }

    fn flush_batch(&mut self) -> Result<()> {
        let rows = self.pending_rows();
        if rows == 0 {
            return Ok(());
        }

        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(ColumnBuilder::finish).collect();
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;

        if self.writer.is_none() {
            let file = File::create(&self.path)?;
            let props = WriterProperties::builder()
                .set_compression(self.compression)
                .set_max_row_group_size(self.batch_size)
                .build();
            self.writer = Some(ArrowWriter::try_new(file, self.schema.clone(), Some(props))?);
            debug!(path = %self.path.display(), "Opened columnar output");
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&batch)?;
        }

        self.rows_written += rows;
        self.batches_written += 1;
        debug!(rows, total = self.rows_written, "Wrote batch");
        Ok(())
    }

    /// Flush the final partial batch and close the file. Returns `None` when
    /// no row was ever pushed.
    pub fn finish(mut self) -> Result<Option<ColumnarSummary>> {
        self.flush_batch()?;
        match self.writer.take() {
            Some(writer) => {
                writer.close()?;
                Ok(Some(ColumnarSummary {
                    path: self.path,
                    rows_written: self.rows_written,
                    batches_written: self.batches_written,
                }))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnarSummary {
    pub path: PathBuf,
    pub rows_written: usize,
    pub batches_written: usize,
}

pub fn parse_compression(compression: &str) -> Result<Compression> {
    Ok(match compression.to_lowercase().as_str() {
        COMPRESSION_SNAPPY => Compression::SNAPPY,
        COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
        COMPRESSION_LZ4 => Compression::LZ4,
        COMPRESSION_ZSTD => Compression::ZSTD(parquet::basic::ZstdLevel::default()),
        COMPRESSION_NONE => Compression::UNCOMPRESSED,
        _ => {
            return Err(ProcessingError::Config(config::ConfigError::Message(format!(
                "Unsupported compression: {}",
                compression
            ))))
        }
    })
}

/// Row-group layout of a written Parquet file.
pub fn get_file_info(path: &Path) -> Result<ParquetFileInfo> {
    use parquet::file::reader::{FileReader, SerializedFileReader};

    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)?;
    let metadata = reader.metadata();

    let row_groups = metadata.num_row_groups();
    let row_group_sizes = (0..row_groups)
        .map(|i| metadata.row_group(i).num_rows())
        .collect();
    let compression = (row_groups > 0 && metadata.row_group(0).num_columns() > 0)
        .then(|| metadata.row_group(0).column(0).compression());

    Ok(ParquetFileInfo {
        total_rows: metadata.file_metadata().num_rows(),
        row_groups: row_groups as i32,
        row_group_sizes,
        file_size: std::fs::metadata(path)?.len(),
        compression,
    })
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Option<Compression>,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
        )
    }
}
