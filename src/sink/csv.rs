use std::path::{Path, PathBuf};

use crate::error::{SinkError, SinkResult};
use crate::types::{Chunk, Schema, Value};

use super::staged::StagedFile;
use super::{OutputEncoding, ReportSink, check_chunk};

/// Delimited text output: a header row, then one record per row. Null is an empty field.
pub struct CsvSink {
    writer: csv::Writer<StagedFile>,
    schema: Schema,
    record: Vec<String>,
}

impl CsvSink {
    pub fn create(path: &Path, schema: &Schema) -> SinkResult<Self> {
        let mut writer = csv::Writer::from_writer(StagedFile::create(path)?);
        writer.write_record(schema.field_names())?;
        Ok(Self {
            writer,
            schema: schema.clone(),
            record: Vec::with_capacity(schema.len()),
        })
    }
}

impl ReportSink for CsvSink {
    fn encoding(&self) -> OutputEncoding {
        OutputEncoding::Csv
    }

    fn write_chunk(&mut self, chunk: &Chunk) -> SinkResult<()> {
        check_chunk(&self.schema, chunk)?;
        for row in &chunk.rows {
            self.record.clear();
            self.record.extend(row.iter().map(csv_field));
            self.writer.write_record(&self.record)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> SinkResult<PathBuf> {
        let staged = self
            .writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))?;
        staged.persist()
    }
}

fn csv_field(v: &Value) -> String {
    match v {
        Value::Float64(f) if f.is_nan() => String::new(),
        other => other.to_string(),
    }
}
