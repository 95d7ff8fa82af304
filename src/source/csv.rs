//! CSV table source.
//!
//! Rules:
//!
//! - CSV must have headers.
//! - Headers must contain all schema fields (order can differ).
//! - Each value is parsed according to the schema field type.
//! - A record with a different field count than the header is a malformed row.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use csv::{Position, StringRecord};

use crate::error::{SourceError, SourceResult};
use crate::types::{Chunk, DataSet, Schema, SchemaRef};

use super::{parse_text_value, ChunkCursor, TableSource};

/// Streams a CSV input in chunks. Rewinding seeks back to the first data record.
pub struct CsvSource<R> {
    reader: csv::Reader<R>,
    schema: SchemaRef,
    projection: Vec<usize>,
    data_start: Position,
    record: StringRecord,
    cursor: ChunkCursor,
}

impl CsvSource<File> {
    pub fn from_path(path: impl AsRef<Path>, schema: Schema, chunk_size: usize) -> SourceResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, schema, chunk_size)
    }
}

impl<R: Read + Seek> CsvSource<R> {
    pub fn from_reader(input: R, schema: Schema, chunk_size: usize) -> SourceResult<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
        let projection = project_headers(reader.headers()?, &schema)?;
        let data_start = reader.position().clone();
        Ok(Self {
            reader,
            schema: Arc::new(schema),
            projection,
            data_start,
            record: StringRecord::new(),
            cursor: ChunkCursor::new(chunk_size),
        })
    }
}

impl<R: Read + Seek> TableSource for CsvSource<R> {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn next_chunk(&mut self) -> SourceResult<Option<Chunk>> {
        let mut rows = Vec::with_capacity(self.cursor.chunk_size());
        while rows.len() < self.cursor.chunk_size() {
            if !read_record(&mut self.reader, &mut self.record)? {
                break;
            }
            let line = self.record.position().map(Position::line).unwrap_or(0);
            rows.push(convert_record(&self.record, line, &self.schema, &self.projection)?);
        }
        Ok(self.cursor.emit(&self.schema, rows))
    }

    fn rewind(&mut self) -> SourceResult<()> {
        self.reader.seek(self.data_start.clone())?;
        self.cursor.reset();
        Ok(())
    }
}

/// Load a whole CSV file, recording the physical line of every row.
pub fn load_csv_dataset(path: impl AsRef<Path>, schema: &Schema) -> SourceResult<DataSet> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let projection = project_headers(reader.headers()?, schema)?;

    let mut record = StringRecord::new();
    let mut rows = Vec::new();
    let mut lines = Vec::new();
    while read_record(&mut reader, &mut record)? {
        let line = record.position().map(Position::line).unwrap_or(0);
        rows.push(convert_record(&record, line, schema, &projection)?);
        lines.push(line);
    }
    Ok(DataSet::with_lines(schema.clone(), rows, lines))
}

/// Header names of a CSV file, in file order.
pub fn read_csv_headers(path: impl AsRef<Path>) -> SourceResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    Ok(reader.headers()?.iter().map(|h| h.trim().to_string()).collect())
}

/// The entries of `required` that are not headers of the CSV file at `path`.
pub fn missing_columns(path: impl AsRef<Path>, required: &[&str]) -> SourceResult<Vec<String>> {
    let headers = read_csv_headers(path)?;
    Ok(required
        .iter()
        .filter(|name| !headers.iter().any(|h| h == *name))
        .map(|name| name.to_string())
        .collect())
}

/// Map schema fields -> CSV column indexes (allows re-ordered CSV columns).
fn project_headers(headers: &StringRecord, schema: &Schema) -> SourceResult<Vec<usize>> {
    schema
        .fields
        .iter()
        .map(|field| {
            headers
                .iter()
                .position(|h| h.trim() == field.name)
                .ok_or_else(|| SourceError::SchemaMismatch {
                    message: format!(
                        "missing required column '{}'. headers={:?}",
                        field.name,
                        headers.iter().collect::<Vec<_>>()
                    ),
                })
        })
        .collect()
}

fn read_record<R: Read>(reader: &mut csv::Reader<R>, record: &mut StringRecord) -> SourceResult<bool> {
    reader.read_record(record).map_err(|e| {
        let malformed = match e.kind() {
            csv::ErrorKind::UnequalLengths {
                pos,
                expected_len,
                len,
            } => Some(SourceError::MalformedRow {
                line: pos.as_ref().map(Position::line).unwrap_or(0),
                column: String::new(),
                raw: String::new(),
                message: format!("expected {expected_len} fields, found {len}"),
            }),
            _ => None,
        };
        malformed.unwrap_or_else(|| SourceError::Csv(e))
    })
}

fn convert_record(
    record: &StringRecord,
    line: u64,
    schema: &Schema,
    projection: &[usize],
) -> SourceResult<Vec<crate::types::Value>> {
    schema
        .fields
        .iter()
        .zip(projection)
        .map(|(field, &idx)| {
            let raw = record.get(idx).unwrap_or("");
            parse_text_value(line, &field.name, field.data_type, raw)
        })
        .collect()
}
