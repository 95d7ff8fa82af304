use std::io::Write;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};

use crate::error::{SinkError, SinkResult};
use crate::types::{Chunk, Schema, Value};

use super::staged::StagedFile;
use super::{OutputEncoding, ReportSink, check_chunk};

/// Name of the single worksheet in generated workbooks.
pub const SHEET_NAME: &str = "report";

/// Data rows available below the header row.
const MAX_DATA_ROWS: u32 = 1_048_575;

/// Spreadsheet output. The worksheet is held in memory and the container is written at finish.
pub struct XlsxSink {
    staged: StagedFile,
    worksheet: Worksheet,
    schema: Schema,
    next_row: u32,
}

impl XlsxSink {
    pub fn create(path: &Path, schema: &Schema) -> SinkResult<Self> {
        let staged = StagedFile::create(path)?;
        let mut worksheet = Worksheet::new();
        worksheet.set_name(SHEET_NAME)?;
        for (col, name) in schema.field_names().enumerate() {
            worksheet.write_string(0, column_index(col)?, name)?;
        }
        Ok(Self {
            staged,
            worksheet,
            schema: schema.clone(),
            next_row: 1,
        })
    }
}

fn column_index(col: usize) -> SinkResult<u16> {
    u16::try_from(col).map_err(|_| SinkError::Xlsx(XlsxError::RowColumnLimitError))
}

impl ReportSink for XlsxSink {
    fn encoding(&self) -> OutputEncoding {
        OutputEncoding::Xlsx
    }

    fn write_chunk(&mut self, chunk: &Chunk) -> SinkResult<()> {
        check_chunk(&self.schema, chunk)?;
        for row in &chunk.rows {
            if self.next_row > MAX_DATA_ROWS {
                return Err(SinkError::Xlsx(XlsxError::RowColumnLimitError));
            }
            for (col, value) in row.iter().enumerate() {
                let col = column_index(col)?;
                match value {
                    Value::Null => {}
                    Value::Int64(i) => {
                        self.worksheet.write_number(self.next_row, col, *i as f64)?;
                    }
                    Value::Float64(f) if f.is_finite() => {
                        self.worksheet.write_number(self.next_row, col, *f)?;
                    }
                    Value::Float64(_) => {}
                    Value::Bool(b) => {
                        self.worksheet.write_boolean(self.next_row, col, *b)?;
                    }
                    Value::Utf8(s) => {
                        self.worksheet.write_string(self.next_row, col, s)?;
                    }
                }
            }
            self.next_row += 1;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> SinkResult<PathBuf> {
        let Self {
            mut staged, worksheet, ..
        } = *self;
        let mut workbook = Workbook::new();
        workbook.push_worksheet(worksheet);
        let bytes = workbook.save_to_buffer()?;
        staged.write_all(&bytes)?;
        staged.flush()?;
        staged.persist()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::XlsxSink;
    use crate::error::SinkError;
    use crate::sink::ReportSink;
    use crate::types::{Chunk, DataType, Field, Schema, Value};

    #[test]
    fn writes_a_zip_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        let schema = Schema::new(vec![Field::new("n", DataType::Int64), Field::new("s", DataType::Utf8)]);
        let mut sink = Box::new(XlsxSink::create(&path, &schema).unwrap());
        let rows = vec![vec![Value::Int64(7), Value::Utf8("x".into())], vec![Value::Null, Value::Null]];
        sink.write_chunk(&Chunk::new(0, 0, Arc::new(schema), rows)).unwrap();
        sink.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn chunks_with_other_columns_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Schema::new(vec![Field::new("n", DataType::Int64)]);
        let mut sink = XlsxSink::create(&dir.path().join("out.xlsx"), &schema).unwrap();
        let other = Arc::new(Schema::new(vec![Field::new("m", DataType::Int64)]));
        let err = sink.write_chunk(&Chunk::new(0, 0, other, vec![])).unwrap_err();
        assert!(matches!(err, SinkError::SchemaMismatch { .. }));
    }
}
