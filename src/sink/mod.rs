//! Report sinks: ordered chunk streams written to CSV, JSON or XLSX.
//!
//! Every sink writes into a temporary file in the destination directory and only renames it to
//! the final path in [`ReportSink::finish`]. A sink that is aborted or dropped removes its
//! temporary file.

mod csv;
mod json;
mod staged;
mod xlsx;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::{SinkError, SinkResult};
use crate::types::{Chunk, Schema};

pub use self::csv::CsvSink;
pub use self::json::JsonSink;
pub use self::xlsx::{SHEET_NAME, XlsxSink};

/// Output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// Tabular-delimited text.
    Csv,
    /// Spreadsheet workbook.
    Xlsx,
    /// Array of row objects.
    Json,
}

impl OutputEncoding {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Json => "json",
        }
    }

    /// Infer the encoding from a destination path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputEncoding {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" => Ok(Self::Xlsx),
            "json" => Ok(Self::Json),
            _ => Err(SinkError::UnsupportedEncoding { name: s.to_string() }),
        }
    }
}

/// Consumer of the ordered chunk stream.
pub trait ReportSink {
    fn encoding(&self) -> OutputEncoding;

    /// Append one chunk. Chunks arrive in ordinal order.
    fn write_chunk(&mut self, chunk: &Chunk) -> SinkResult<()>;

    /// Complete the output and publish it under the destination path.
    fn finish(self: Box<Self>) -> SinkResult<PathBuf>;

    /// Discard everything written so far. Nothing appears under the destination path.
    fn abort(self: Box<Self>) {}
}

/// Open a sink writing `schema`-shaped chunks to `path`.
pub fn open_sink(path: &Path, encoding: OutputEncoding, schema: &Schema) -> SinkResult<Box<dyn ReportSink>> {
    Ok(match encoding {
        OutputEncoding::Csv => Box::new(CsvSink::create(path, schema)?),
        OutputEncoding::Json => Box::new(JsonSink::create(path, schema)?),
        OutputEncoding::Xlsx => Box::new(XlsxSink::create(path, schema)?),
    })
}

fn check_chunk(expected: &Schema, chunk: &Chunk) -> SinkResult<()> {
    if chunk.schema.as_ref() == expected {
        return Ok(());
    }
    Err(SinkError::SchemaMismatch {
        message: format!(
            "chunk {} has columns {:?}, sink expects {:?}",
            chunk.ordinal,
            chunk.schema.field_names().collect::<Vec<_>>(),
            expected.field_names().collect::<Vec<_>>()
        ),
    })
}
