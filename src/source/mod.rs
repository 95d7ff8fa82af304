//! Table sources: lazy, restartable streams of fixed-size [`Chunk`]s.
//!
//! Most callers describe an input with a [`SourceSpec`] and open it with [`open_source`], which
//! picks the reader from the file extension (or [`SourceSpec::format`] when set). Reference data
//! for a join is loaded in full with [`load_dataset`] and attached with [`join::JoinedSource`].
//!
//! The caller supplies the [`Schema`]: headers must contain every schema field (order may differ,
//! extra columns are ignored), and every value is parsed into its field's declared type.
//! Empty cells, empty strings and JSON `null` become [`Value::Null`].
//!
//! Format-specific readers live under [`csv`], [`json`], [`parquet`], [`memory`] and, with the
//! `excel` feature, `excel`.

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod join;
pub mod json;
pub mod memory;
pub mod parquet;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{SourceError, SourceResult};
use crate::types::{Chunk, DataSet, DataType, Schema, SchemaRef, Value};

pub use join::{DuplicateKeyPolicy, JoinKind, JoinSpec, JoinedSource, ReferenceIndex, join_schema};
pub use memory::MemorySource;

/// A lazy, restartable sequence of chunks sharing one schema.
///
/// Chunk ordinals start at 0 and increase by one; every chunk except the last holds exactly the
/// configured number of rows. Sources are driven from a single thread.
pub trait TableSource {
    /// Schema of every chunk this source produces.
    fn schema(&self) -> &SchemaRef;

    /// Read the next chunk, or `None` once the source is exhausted.
    fn next_chunk(&mut self) -> SourceResult<Option<Chunk>>;

    /// Restart from the first row. The next chunk has ordinal 0 again.
    fn rewind(&mut self) -> SourceResult<()>;
}

impl<S: TableSource + ?Sized> TableSource for Box<S> {
    fn schema(&self) -> &SchemaRef {
        (**self).schema()
    }

    fn next_chunk(&mut self) -> SourceResult<Option<Chunk>> {
        (**self).next_chunk()
    }

    fn rewind(&mut self) -> SourceResult<()> {
        (**self).rewind()
    }
}

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// A JSON array of objects (or a single object).
    Json,
    /// Newline-delimited JSON objects.
    Ndjson,
    /// Apache Parquet.
    Parquet,
    /// Spreadsheet/workbook formats (feature-gated behind `excel`).
    Excel,
}

impl SourceFormat {
    /// Parse a source format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "ndjson" | "jsonl" => Some(Self::Ndjson),
            "parquet" | "pq" => Some(Self::Parquet),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }

    /// Infer the format from a path's extension.
    pub fn from_path(path: &Path) -> SourceResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| SourceError::UnsupportedFormat {
                message: format!("cannot infer format: '{}' has no extension", path.display()),
            })?;
        Self::from_extension(ext).ok_or_else(|| SourceError::UnsupportedFormat {
            message: format!("unsupported file extension '{ext}'"),
        })
    }
}

/// A caller-resolved input: where to read, what shape to expect.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub schema: Schema,
    /// If `None`, the format is inferred from the file extension.
    pub format: Option<SourceFormat>,
    /// Worksheet to read from a workbook; the first sheet when `None`.
    pub sheet: Option<String>,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            path: path.into(),
            schema,
            format: None,
            sheet: None,
        }
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    fn resolve_format(&self) -> SourceResult<SourceFormat> {
        match self.format {
            Some(f) => Ok(f),
            None => SourceFormat::from_path(&self.path),
        }
    }
}

/// Open a chunked source for `spec`, producing chunks of at most `chunk_size` rows.
///
/// CSV, NDJSON and Parquet are streamed; JSON arrays and workbooks are read in full and then
/// chunked.
pub fn open_source(spec: &SourceSpec, chunk_size: usize) -> SourceResult<Box<dyn TableSource>> {
    check_schema(&spec.schema)?;
    let format = spec.resolve_format()?;
    tracing::debug!(path = %spec.path.display(), ?format, chunk_size, "opening source");

    let source: Box<dyn TableSource> = match format {
        SourceFormat::Csv => Box::new(csv::CsvSource::from_path(&spec.path, spec.schema.clone(), chunk_size)?),
        SourceFormat::Ndjson => Box::new(json::NdjsonSource::from_path(
            &spec.path,
            spec.schema.clone(),
            chunk_size,
        )?),
        SourceFormat::Json => Box::new(MemorySource::new(
            json::load_json_dataset(&spec.path, &spec.schema)?,
            chunk_size,
        )),
        SourceFormat::Parquet => Box::new(parquet::ParquetSource::from_path(
            &spec.path,
            spec.schema.clone(),
            chunk_size,
        )?),
        SourceFormat::Excel => Box::new(MemorySource::new(load_excel(spec)?, chunk_size)),
    };
    Ok(source)
}

/// Load a whole (bounded) dataset, e.g. reference data for a join.
///
/// Row line numbers are recorded for diagnostics: physical lines for CSV and NDJSON, sheet rows
/// for workbooks, and 1-based record numbers for JSON arrays and Parquet.
pub fn load_dataset(spec: &SourceSpec) -> SourceResult<DataSet> {
    check_schema(&spec.schema)?;
    let format = spec.resolve_format()?;
    let ds = match format {
        SourceFormat::Csv => csv::load_csv_dataset(&spec.path, &spec.schema)?,
        SourceFormat::Json | SourceFormat::Ndjson => json::load_json_dataset(&spec.path, &spec.schema)?,
        SourceFormat::Parquet => {
            let mut source = parquet::ParquetSource::from_path(&spec.path, spec.schema.clone(), 4_096)?;
            drain(&mut source)?
        }
        SourceFormat::Excel => load_excel(spec)?,
    };
    tracing::debug!(path = %spec.path.display(), rows = ds.row_count(), "loaded dataset");
    Ok(ds)
}

/// Read every remaining chunk of `source` into one [`DataSet`].
pub fn drain(source: &mut dyn TableSource) -> SourceResult<DataSet> {
    let schema = source.schema().as_ref().clone();
    let mut rows = Vec::new();
    while let Some(chunk) = source.next_chunk()? {
        rows.extend(chunk.rows);
    }
    Ok(DataSet::new(schema, rows))
}

#[cfg(feature = "excel")]
fn load_excel(spec: &SourceSpec) -> SourceResult<DataSet> {
    excel::load_excel_dataset(&spec.path, spec.sheet.as_deref(), &spec.schema)
}

#[cfg(not(feature = "excel"))]
fn load_excel(_spec: &SourceSpec) -> SourceResult<DataSet> {
    Err(SourceError::UnsupportedFormat {
        message: "excel sources require the `excel` cargo feature".to_string(),
    })
}

fn check_schema(schema: &Schema) -> SourceResult<()> {
    match schema.duplicate_name() {
        Some(name) => Err(SourceError::SchemaMismatch {
            message: format!("column '{name}' appears more than once in the schema"),
        }),
        None => Ok(()),
    }
}

/// Assigns ordinals and stream positions to the chunks of one source.
#[derive(Debug, Clone)]
pub(crate) struct ChunkCursor {
    chunk_size: usize,
    ordinal: usize,
    rows_emitted: usize,
}

impl ChunkCursor {
    pub(crate) fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ordinal: 0,
            rows_emitted: 0,
        }
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Wrap `rows` as the next chunk; `None` when there are no rows.
    pub(crate) fn emit(&mut self, schema: &SchemaRef, rows: Vec<Vec<Value>>) -> Option<Chunk> {
        if rows.is_empty() {
            return None;
        }
        let chunk = Chunk::new(self.ordinal, self.rows_emitted, Arc::clone(schema), rows);
        self.ordinal += 1;
        self.rows_emitted += chunk.row_count();
        Some(chunk)
    }

    pub(crate) fn reset(&mut self) {
        self.ordinal = 0;
        self.rows_emitted = 0;
    }
}

/// Parse one textual cell into `data_type`. Surrounding whitespace is ignored.
pub(crate) fn parse_text_value(line: u64, column: &str, data_type: DataType, raw: &str) -> SourceResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let malformed = |message: String| SourceError::MalformedRow {
        line,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };
    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(trimmed.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| malformed(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| malformed(e.to_string())),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(malformed),
    }
}

pub(crate) fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_text_value, SourceFormat};
    use crate::error::SourceError;
    use crate::types::{DataType, Value};

    #[test]
    fn formats_follow_extensions() {
        assert_eq!(SourceFormat::from_extension("CSV"), Some(SourceFormat::Csv));
        assert_eq!(SourceFormat::from_extension("jsonl"), Some(SourceFormat::Ndjson));
        assert_eq!(SourceFormat::from_extension("pq"), Some(SourceFormat::Parquet));
        assert_eq!(SourceFormat::from_extension("ods"), Some(SourceFormat::Excel));
        assert_eq!(SourceFormat::from_extension("txt"), None);
        assert!(matches!(
            SourceFormat::from_path(std::path::Path::new("data")),
            Err(SourceError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn text_values_parse_by_type() {
        assert_eq!(parse_text_value(2, "a", DataType::Int64, " 42 ").unwrap(), Value::Int64(42));
        assert_eq!(parse_text_value(2, "a", DataType::Float64, "1.5").unwrap(), Value::Float64(1.5));
        assert_eq!(parse_text_value(2, "a", DataType::Bool, "Yes").unwrap(), Value::Bool(true));
        assert_eq!(parse_text_value(2, "a", DataType::Utf8, "").unwrap(), Value::Null);

        let err = parse_text_value(7, "qty", DataType::Int64, "abc").unwrap_err();
        assert!(matches!(err, SourceError::MalformedRow { line: 7, ref column, .. } if column == "qty"));
    }
}
