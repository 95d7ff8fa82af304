use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{SinkError, SinkResult};
use crate::types::{Chunk, Schema, Value};

use super::staged::StagedFile;
use super::{OutputEncoding, ReportSink, check_chunk};

/// A JSON array of row objects, streamed one row at a time.
///
/// Object keys follow output column order. Non-finite floats are written as `null`.
pub struct JsonSink {
    writer: BufWriter<StagedFile>,
    schema: Schema,
    columns: Vec<String>,
    rows_written: u64,
}

impl JsonSink {
    pub fn create(path: &Path, schema: &Schema) -> SinkResult<Self> {
        let mut writer = BufWriter::new(StagedFile::create(path)?);
        writer.write_all(b"[")?;
        Ok(Self {
            writer,
            schema: schema.clone(),
            columns: schema.field_names().map(str::to_string).collect(),
            rows_written: 0,
        })
    }
}

impl ReportSink for JsonSink {
    fn encoding(&self) -> OutputEncoding {
        OutputEncoding::Json
    }

    fn write_chunk(&mut self, chunk: &Chunk) -> SinkResult<()> {
        check_chunk(&self.schema, chunk)?;
        for row in &chunk.rows {
            let sep: &[u8] = if self.rows_written == 0 { b"\n" } else { b",\n" };
            self.writer.write_all(sep)?;
            serde_json::to_writer(
                &mut self.writer,
                &JsonRow {
                    columns: &self.columns,
                    values: row,
                },
            )?;
            self.rows_written += 1;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> SinkResult<PathBuf> {
        let tail: &[u8] = if self.rows_written == 0 { b"]\n" } else { b"\n]\n" };
        self.writer.write_all(tail)?;
        let staged = self
            .writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))?;
        staged.persist()
    }
}

struct JsonRow<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for JsonRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(name, &JsonCell(value))?;
        }
        map.end()
    }
}

struct JsonCell<'a>(&'a Value);

impl Serialize for JsonCell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_unit(),
            Value::Int64(i) => serializer.serialize_i64(*i),
            Value::Float64(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float64(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Utf8(s) => serializer.serialize_str(s),
        }
    }
}
