//! In-memory table source over a [`DataSet`].
//!
//! Used for inputs that are read in full (JSON arrays, workbooks) and in tests.

use std::sync::Arc;

use crate::error::SourceResult;
use crate::types::{Chunk, DataSet, SchemaRef};

use super::{ChunkCursor, TableSource};

pub struct MemorySource {
    data: DataSet,
    schema: SchemaRef,
    next_row: usize,
    cursor: ChunkCursor,
}

impl MemorySource {
    pub fn new(data: DataSet, chunk_size: usize) -> Self {
        let schema = Arc::new(data.schema.clone());
        Self {
            data,
            schema,
            next_row: 0,
            cursor: ChunkCursor::new(chunk_size),
        }
    }
}

impl TableSource for MemorySource {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn next_chunk(&mut self) -> SourceResult<Option<Chunk>> {
        let start = self.next_row.min(self.data.rows.len());
        let end = (start + self.cursor.chunk_size()).min(self.data.rows.len());
        self.next_row = end;
        Ok(self.cursor.emit(&self.schema, self.data.rows[start..end].to_vec()))
    }

    fn rewind(&mut self) -> SourceResult<()> {
        self.next_row = 0;
        self.cursor.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySource;
    use crate::source::{drain, TableSource};
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn dataset(n: i64) -> DataSet {
        let schema = Schema::new(vec![Field::new("n", DataType::Int64)]);
        DataSet::new(schema, (0..n).map(|i| vec![Value::Int64(i)]).collect())
    }

    #[test]
    fn uneven_chunking_keeps_every_row() {
        let mut src = MemorySource::new(dataset(7), 3);
        let mut sizes = Vec::new();
        let mut firsts = Vec::new();
        while let Some(chunk) = src.next_chunk().unwrap() {
            sizes.push(chunk.row_count());
            firsts.push(chunk.first_row);
        }
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(firsts, vec![0, 3, 6]);

        src.rewind().unwrap();
        assert_eq!(drain(&mut src).unwrap().rows, dataset(7).rows);
    }

    #[test]
    fn empty_dataset_yields_no_chunks() {
        let mut src = MemorySource::new(dataset(0), 3);
        assert!(src.next_chunk().unwrap().is_none());
    }
}
