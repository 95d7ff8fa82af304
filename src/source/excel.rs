//! Workbook input (`.xlsx`, `.xls`, `.ods`, ...), behind the `excel` feature.
//!
//! Behavior:
//! - Picks `sheet` if provided; otherwise uses the first sheet in the workbook
//! - Detects the first non-empty row as the header row
//! - Validates that all schema fields exist as headers
//! - Reads remaining rows and converts cells into typed `Value`s
//!
//! Workbooks are read in full; [`super::open_source`] chunks the result in memory.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{SourceError, SourceResult};
use crate::types::{DataSet, DataType, Schema, Value};

/// Load one worksheet. Row line numbers are 1-based sheet rows.
pub fn load_excel_dataset(path: impl AsRef<Path>, sheet: Option<&str>, schema: &Schema) -> SourceResult<DataSet> {
    let mut workbook = open_workbook_auto(path)?;

    let sheet = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| SourceError::SchemaMismatch {
                message: "workbook has no sheets".to_string(),
            })?,
    };
    let range = workbook.worksheet_range(&sheet)?;

    let (header_row, projection) = header_projection(&range, schema).map_err(|e| match e {
        SourceError::SchemaMismatch { message } => SourceError::SchemaMismatch {
            message: format!("sheet '{sheet}': {message}"),
        },
        other => other,
    })?;

    // Range rows are relative to the range start, which need not be A1.
    let first_sheet_row = range.start().map(|(r, _)| u64::from(r)).unwrap_or(0);

    let mut rows = Vec::new();
    let mut lines = Vec::new();
    for (idx0, row) in range.rows().enumerate().skip(header_row + 1) {
        let line = first_sheet_row + idx0 as u64 + 1;
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let values = schema
            .fields
            .iter()
            .zip(&projection)
            .map(|(field, &col)| {
                let cell = row.get(col).unwrap_or(&Data::Empty);
                convert_cell(line, &field.name, field.data_type, cell)
            })
            .collect::<SourceResult<Vec<_>>>()?;
        rows.push(values);
        lines.push(line);
    }

    Ok(DataSet::with_lines(schema.clone(), rows, lines))
}

fn header_projection(range: &calamine::Range<Data>, schema: &Schema) -> SourceResult<(usize, Vec<usize>)> {
    let (header_row, headers) = range
        .rows()
        .enumerate()
        .find(|(_, row)| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|(idx, row)| (idx, row.iter().map(cell_to_header_string).collect::<Vec<_>>()))
        .ok_or_else(|| SourceError::SchemaMismatch {
            message: "sheet has no non-empty rows (no header row found)".to_string(),
        })?;

    let projection = schema
        .fields
        .iter()
        .map(|f| {
            headers
                .iter()
                .position(|h| h.trim() == f.name)
                .ok_or_else(|| SourceError::SchemaMismatch {
                    message: format!("missing required column '{}'. headers={headers:?}", f.name),
                })
        })
        .collect::<SourceResult<Vec<_>>>()?;

    Ok((header_row, projection))
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn convert_cell(line: u64, column: &str, data_type: DataType, c: &Data) -> SourceResult<Value> {
    if matches!(c, Data::Empty) {
        return Ok(Value::Null);
    }
    if let Data::String(s) = c {
        // Text cells go through the same parser as CSV fields.
        return super::parse_text_value(line, column, data_type, s);
    }

    let malformed = |message: &str| SourceError::MalformedRow {
        line,
        column: column.to_string(),
        raw: c.to_string(),
        message: message.to_string(),
    };
    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(c.to_string())),
        DataType::Bool => match c {
            Data::Bool(b) => Ok(Value::Bool(*b)),
            Data::Int(i) => Ok(Value::Bool(*i != 0)),
            Data::Float(f) => Ok(Value::Bool(*f != 0.0)),
            _ => Err(malformed("expected bool")),
        },
        DataType::Int64 => match c {
            Data::Int(i) => Ok(Value::Int64(*i)),
            Data::Float(f) if f.fract() == 0.0 => Ok(Value::Int64(*f as i64)),
            Data::Float(_) => Err(malformed("expected integer (got non-integer float)")),
            _ => Err(malformed("expected integer")),
        },
        DataType::Float64 => match c {
            Data::Float(f) => Ok(Value::Float64(*f)),
            Data::Int(i) => Ok(Value::Float64(*i as f64)),
            _ => Err(malformed("expected number")),
        },
    }
}
