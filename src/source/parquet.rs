//! Parquet table source.
//!
//! Rows are streamed with the Parquet record API. Schema fields are matched against the file's
//! top-level columns by name. Rewinding reopens the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::reader::RowIter;
use parquet::record::Field;

use crate::error::{SourceError, SourceResult};
use crate::types::{Chunk, DataType, Schema, SchemaRef, Value};

use super::{ChunkCursor, TableSource};

pub struct ParquetSource {
    path: PathBuf,
    schema: SchemaRef,
    projection: Vec<usize>,
    rows: RowIter<'static>,
    rows_read: u64,
    cursor: ChunkCursor,
}

impl ParquetSource {
    pub fn from_path(path: impl AsRef<Path>, schema: Schema, chunk_size: usize) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (projection, rows) = open_rows(&path, &schema)?;
        Ok(Self {
            path,
            schema: Arc::new(schema),
            projection,
            rows,
            rows_read: 0,
            cursor: ChunkCursor::new(chunk_size),
        })
    }
}

impl TableSource for ParquetSource {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn next_chunk(&mut self) -> SourceResult<Option<Chunk>> {
        let mut out = Vec::with_capacity(self.cursor.chunk_size());
        while out.len() < self.cursor.chunk_size() {
            let Some(row) = self.rows.next() else {
                break;
            };
            let row = row?;
            self.rows_read += 1;

            let cells: Vec<&Field> = row.get_column_iter().map(|(_, f)| f).collect();
            let values = self
                .schema
                .fields
                .iter()
                .zip(&self.projection)
                .map(|(field, &idx)| match cells.get(idx) {
                    Some(cell) => convert_parquet_field(self.rows_read, &field.name, field.data_type, cell),
                    None => Ok(Value::Null),
                })
                .collect::<SourceResult<Vec<_>>>()?;
            out.push(values);
        }
        Ok(self.cursor.emit(&self.schema, out))
    }

    fn rewind(&mut self) -> SourceResult<()> {
        let (projection, rows) = open_rows(&self.path, &self.schema)?;
        self.projection = projection;
        self.rows = rows;
        self.rows_read = 0;
        self.cursor.reset();
        Ok(())
    }
}

fn open_rows(path: &Path, schema: &Schema) -> SourceResult<(Vec<usize>, RowIter<'static>)> {
    let reader = SerializedFileReader::try_from(path)?;

    let columns: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .root_schema()
        .get_fields()
        .iter()
        .map(|t| t.name().to_string())
        .collect();

    let projection = schema
        .fields
        .iter()
        .map(|field| {
            columns
                .iter()
                .position(|c| *c == field.name)
                .ok_or_else(|| SourceError::SchemaMismatch {
                    message: format!("missing required column '{}'. columns={columns:?}", field.name),
                })
        })
        .collect::<SourceResult<Vec<_>>>()?;

    Ok((projection, reader.into_iter()))
}

fn convert_parquet_field(row: u64, column: &str, data_type: DataType, f: &Field) -> SourceResult<Value> {
    if matches!(f, Field::Null) {
        return Ok(Value::Null);
    }
    let malformed = |message: &str| SourceError::MalformedRow {
        line: row,
        column: column.to_string(),
        raw: f.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => match f {
            Field::Str(s) => Ok(Value::Utf8(s.clone())),
            _ => Err(malformed("expected string")),
        },
        DataType::Bool => match f {
            Field::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(malformed("expected bool")),
        },
        DataType::Int64 => match f {
            Field::Byte(v) => Ok(Value::Int64(i64::from(*v))),
            Field::Short(v) => Ok(Value::Int64(i64::from(*v))),
            Field::Int(v) => Ok(Value::Int64(i64::from(*v))),
            Field::Long(v) => Ok(Value::Int64(*v)),
            Field::UByte(v) => Ok(Value::Int64(i64::from(*v))),
            Field::UShort(v) => Ok(Value::Int64(i64::from(*v))),
            Field::UInt(v) => Ok(Value::Int64(i64::from(*v))),
            Field::ULong(v) => i64::try_from(*v)
                .map(Value::Int64)
                .map_err(|_| malformed("u64 out of range for i64")),
            _ => Err(malformed("expected integer")),
        },
        DataType::Float64 => match f {
            Field::Float(v) => Ok(Value::Float64(f64::from(*v))),
            Field::Double(v) => Ok(Value::Float64(*v)),
            Field::Int(v) => Ok(Value::Float64(f64::from(*v))),
            Field::Long(v) => Ok(Value::Float64(*v as f64)),
            _ => Err(malformed("expected number")),
        },
    }
}
