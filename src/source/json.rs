//! JSON table sources.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]` (read in full, see [`load_json_dataset`])
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n` (streamed by [`NdjsonSource`])
//!
//! Nested fields are supported using dot paths in schema field names (e.g. `user.name`). Every
//! schema field must be present in every object; explicit `null` is allowed.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::error::{SourceError, SourceResult};
use crate::types::{Chunk, DataSet, DataType, Schema, SchemaRef, Value};

use super::{ChunkCursor, TableSource};

/// Streams newline-delimited JSON objects in chunks. Blank lines are skipped.
pub struct NdjsonSource<R> {
    reader: R,
    schema: SchemaRef,
    line: u64,
    buf: String,
    cursor: ChunkCursor,
}

impl NdjsonSource<BufReader<File>> {
    pub fn from_path(path: impl AsRef<Path>, schema: Schema, chunk_size: usize) -> SourceResult<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file), schema, chunk_size))
    }
}

impl<R: BufRead + Seek> NdjsonSource<R> {
    pub fn from_reader(reader: R, schema: Schema, chunk_size: usize) -> Self {
        Self {
            reader,
            schema: Arc::new(schema),
            line: 0,
            buf: String::new(),
            cursor: ChunkCursor::new(chunk_size),
        }
    }
}

impl<R: BufRead + Seek> TableSource for NdjsonSource<R> {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn next_chunk(&mut self) -> SourceResult<Option<Chunk>> {
        let mut rows = Vec::with_capacity(self.cursor.chunk_size());
        while rows.len() < self.cursor.chunk_size() {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                break;
            }
            self.line += 1;
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            let value = serde_json::from_str::<serde_json::Value>(text).map_err(|e| {
                SourceError::MalformedRow {
                    line: self.line,
                    column: String::new(),
                    raw: text.to_string(),
                    message: format!("invalid json: {e}"),
                }
            })?;
            rows.push(convert_object(self.line, &value, &self.schema)?);
        }
        Ok(self.cursor.emit(&self.schema, rows))
    }

    fn rewind(&mut self) -> SourceResult<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.line = 0;
        self.cursor.reset();
        Ok(())
    }
}

/// Load a JSON array, a single object, or NDJSON into a [`DataSet`].
///
/// Array elements are numbered from 1; NDJSON rows carry their physical line.
pub fn load_json_dataset(path: impl AsRef<Path>, schema: &Schema) -> SourceResult<DataSet> {
    let text = fs::read_to_string(path)?;
    load_json_str(&text, schema)
}

/// Same as [`load_json_dataset`], from an in-memory string.
pub fn load_json_str(input: &str, schema: &Schema) -> SourceResult<DataSet> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(DataSet::new(schema.clone(), Vec::new()));
    }

    // First try parsing as a single JSON value (array or object).
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let items = match v {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(_) => vec![v],
            _ => {
                return Err(SourceError::SchemaMismatch {
                    message: "json must be an object, an array of objects, or NDJSON".to_string(),
                });
            }
        };
        let rows = items
            .iter()
            .enumerate()
            .map(|(i, item)| convert_object(i as u64 + 1, item, schema))
            .collect::<SourceResult<Vec<_>>>()?;
        return Ok(DataSet::new(schema.clone(), rows));
    }

    // Fall back to NDJSON.
    let mut rows = Vec::new();
    let mut lines = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line_no = i as u64 + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v = serde_json::from_str::<serde_json::Value>(line).map_err(|e| SourceError::MalformedRow {
            line: line_no,
            column: String::new(),
            raw: line.to_string(),
            message: format!("invalid json: {e}"),
        })?;
        rows.push(convert_object(line_no, &v, schema)?);
        lines.push(line_no);
    }
    Ok(DataSet::with_lines(schema.clone(), rows, lines))
}

fn convert_object(line: u64, v: &serde_json::Value, schema: &Schema) -> SourceResult<Vec<Value>> {
    let obj = v.as_object().ok_or_else(|| SourceError::MalformedRow {
        line,
        column: String::new(),
        raw: v.to_string(),
        message: "not a json object".to_string(),
    })?;

    schema
        .fields
        .iter()
        .map(|field| {
            let jv = get_by_dot_path(obj, &field.name).ok_or_else(|| SourceError::MalformedRow {
                line,
                column: field.name.clone(),
                raw: String::new(),
                message: "missing field".to_string(),
            })?;
            convert_json_value(line, &field.name, field.data_type, jv)
        })
        .collect()
}

fn get_by_dot_path<'a>(
    root: &'a serde_json::Map<String, serde_json::Value>,
    path: &str,
) -> Option<&'a serde_json::Value> {
    // An exact key wins over a nested path.
    if let Some(v) = root.get(path) {
        return Some(v);
    }
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn convert_json_value(line: u64, column: &str, data_type: DataType, v: &serde_json::Value) -> SourceResult<Value> {
    if v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty()) {
        return Ok(Value::Null);
    }
    let malformed = |message: &str| SourceError::MalformedRow {
        line,
        column: column.to_string(),
        raw: v.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => v
            .as_str()
            .map(|s| Value::Utf8(s.trim().to_string()))
            .ok_or_else(|| malformed("expected string")),
        DataType::Bool => v.as_bool().map(Value::Bool).ok_or_else(|| malformed("expected bool")),
        DataType::Int64 => {
            if let Some(n) = v.as_i64() {
                Ok(Value::Int64(n))
            } else if v.is_u64() {
                Err(malformed("u64 out of range for i64"))
            } else {
                match v.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Ok(Value::Int64(f as i64)),
                    _ => Err(malformed("expected integer number")),
                }
            }
        }
        DataType::Float64 => v.as_f64().map(Value::Float64).ok_or_else(|| malformed("expected number")),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{load_json_str, NdjsonSource};
    use crate::error::SourceError;
    use crate::source::TableSource;
    use crate::types::{DataType, Field, Schema, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("user.name", DataType::Utf8),
        ])
    }

    #[test]
    fn arrays_support_nested_paths_and_nulls() {
        let ds = load_json_str(
            r#"[{"id": 1, "user": {"name": "ada"}}, {"id": 2.0, "user": {"name": null}}]"#,
            &schema(),
        )
        .unwrap();
        assert_eq!(
            ds.rows,
            vec![
                vec![Value::Int64(1), Value::Utf8("ada".to_string())],
                vec![Value::Int64(2), Value::Null],
            ]
        );
    }

    #[test]
    fn empty_strings_are_null_and_text_is_trimmed() {
        let ds = load_json_str(
            r#"[{"id": "", "user": {"name": ""}}, {"id": 3, "user": {"name": "  bo "}}, {"id": " ", "user": {"name": "\t"}}]"#,
            &schema(),
        )
        .unwrap();
        assert_eq!(
            ds.rows,
            vec![
                vec![Value::Null, Value::Null],
                vec![Value::Int64(3), Value::Utf8("bo".to_string())],
                vec![Value::Null, Value::Null],
            ]
        );

        let prices = Schema::new(vec![Field::new("x", DataType::Float64)]);
        let ds = load_json_str(r#"[{"x": ""}, {"x": 1.5}]"#, &prices).unwrap();
        assert_eq!(ds.rows, vec![vec![Value::Null], vec![Value::Float64(1.5)]]);
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = load_json_str(r#"[{"id": 1}]"#, &schema()).unwrap_err();
        assert!(matches!(err, SourceError::MalformedRow { line: 1, ref column, .. } if column == "user.name"));
    }

    #[test]
    fn ndjson_streams_with_line_numbers() {
        let data = "{\"id\":1,\"user\":{\"name\":\"a\"}}\n\n{\"id\":2,\"user\":{\"name\":\"b\"}}\n{\"id\":\"x\",\"user\":{\"name\":\"c\"}}\n";
        let mut src = NdjsonSource::from_reader(Cursor::new(data), schema(), 2);
        let chunk = src.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.row_count(), 2);
        let err = src.next_chunk().unwrap_err();
        assert!(matches!(err, SourceError::MalformedRow { line: 4, .. }), "{err:?}");

        src.rewind().unwrap();
        assert_eq!(src.next_chunk().unwrap().unwrap(), chunk);
    }
}
