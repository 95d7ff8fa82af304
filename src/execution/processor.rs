use std::sync::Arc;

use serde::Serialize;

use crate::error::{JobError, JobResult};
use crate::expr::Evaluator;
use crate::rules::RuleSet;
use crate::types::{Chunk, SchemaRef, Value};

/// A rule that could not be evaluated for one row. The row's output for that rule is null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    /// Ordinal of the chunk holding the row.
    pub chunk: usize,
    /// Zero-based row index in the source stream.
    pub row: usize,
    pub rule: String,
    pub message: String,
}

/// Output of [`ChunkProcessor::process`].
#[derive(Debug, Clone)]
pub struct ProcessedChunk {
    pub chunk: Chunk,
    pub failures: Vec<RowFailure>,
}

/// Applies a [`RuleSet`] to chunks. Shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct ChunkProcessor {
    rules: Arc<RuleSet>,
    evaluator: Evaluator,
}

impl ChunkProcessor {
    pub fn new(rules: Arc<RuleSet>, evaluator: Evaluator) -> Self {
        Self { rules, evaluator }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn output_schema(&self) -> &SchemaRef {
        self.rules.output_schema()
    }

    /// Evaluate every rule, in resolved order, for every row of `chunk`.
    ///
    /// Row-level evaluation errors are collected; the only job-level error is a chunk whose
    /// schema does not match the rule set's input schema.
    pub fn process(&self, chunk: Chunk) -> JobResult<ProcessedChunk> {
        if chunk.schema.as_ref() != self.rules.input_schema().as_ref() {
            return Err(JobError::Chunk {
                chunk: chunk.ordinal,
                message: format!(
                    "chunk columns {:?} do not match rule set input {:?}",
                    chunk.schema.field_names().collect::<Vec<_>>(),
                    self.rules.input_schema().field_names().collect::<Vec<_>>()
                ),
            });
        }

        let width = self.output_schema().len();
        let mut failures = Vec::new();
        let mut rows = chunk.rows;
        for (offset, row) in rows.iter_mut().enumerate() {
            row.resize(width, Value::Null);
            for rule in self.rules.rules() {
                let value = match self.evaluator.evaluate(&rule.expression, row) {
                    Ok(v) => v.coerce_to(rule.data_type),
                    Err(e) => {
                        failures.push(RowFailure {
                            chunk: chunk.ordinal,
                            row: chunk.first_row + offset,
                            rule: rule.name.clone(),
                            message: e.to_string(),
                        });
                        Value::Null
                    }
                };
                row[rule.slot] = value;
            }
        }

        Ok(ProcessedChunk {
            chunk: Chunk::new(chunk.ordinal, chunk.first_row, Arc::clone(self.output_schema()), rows),
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ChunkProcessor;
    use crate::error::JobError;
    use crate::expr::{DivisionByZeroPolicy, Evaluator};
    use crate::rules::{RuleDefinitions, RuleSet};
    use crate::types::{Chunk, DataType, Field, Schema, Value};

    fn input() -> Schema {
        Schema::new(vec![
            Field::new("price", DataType::Int64),
            Field::new("qty", DataType::Int64),
            Field::new("label", DataType::Utf8),
        ])
    }

    fn processor(pairs: &[(&str, &str)], policy: DivisionByZeroPolicy) -> ChunkProcessor {
        let defs = RuleDefinitions::from_pairs(pairs.iter().copied()).unwrap();
        let rules = RuleSet::resolve(&defs, &input()).unwrap();
        ChunkProcessor::new(Arc::new(rules), Evaluator::new(policy))
    }

    fn chunk(rows: Vec<Vec<Value>>) -> Chunk {
        Chunk::new(3, 30, Arc::new(input()), rows)
    }

    #[test]
    fn derives_totals_and_discounts() {
        let p = processor(
            &[("discount", "max(0, total * 0.1)"), ("total", "price * qty")],
            DivisionByZeroPolicy::Null,
        );
        let out = p
            .process(chunk(vec![
                vec![Value::Int64(10), Value::Int64(2), Value::Null],
                vec![Value::Int64(5), Value::Null, Value::Null],
            ]))
            .unwrap();
        assert!(out.failures.is_empty());
        assert_eq!(
            out.chunk.schema.field_names().collect::<Vec<_>>(),
            vec!["price", "qty", "label", "total", "discount"]
        );
        assert_eq!(out.chunk.rows[0][3..], [Value::Int64(20), Value::Float64(2.0)]);
        assert_eq!(out.chunk.rows[1][3..], [Value::Null, Value::Null]);
        assert_eq!((out.chunk.ordinal, out.chunk.first_row), (3, 30));
    }

    #[test]
    fn row_failures_are_recorded_and_nulled() {
        let p = processor(
            &[("bad", "label * 2"), ("ratio", "price / qty"), ("ok", "price + 1")],
            DivisionByZeroPolicy::Fail,
        );
        let out = p
            .process(chunk(vec![
                vec![Value::Int64(1), Value::Int64(0), Value::Utf8("x".into())],
                vec![Value::Int64(4), Value::Int64(2), Value::Null],
            ]))
            .unwrap();

        let summary: Vec<_> = out.failures.iter().map(|f| (f.row, f.rule.as_str())).collect();
        assert_eq!(summary, vec![(30, "bad"), (30, "ratio")]);
        assert_eq!(out.chunk.rows[0][3..], [Value::Null, Value::Null, Value::Int64(2)]);
        assert_eq!(out.chunk.rows[1][3..], [Value::Null, Value::Float64(2.0), Value::Int64(5)]);
    }

    #[test]
    fn shadowing_rule_replaces_value_in_place() {
        let p = processor(&[("price", "price * 2"), ("after", "price + 1")], DivisionByZeroPolicy::Null);
        let out = p
            .process(chunk(vec![vec![Value::Int64(3), Value::Int64(1), Value::Null]]))
            .unwrap();
        assert_eq!(
            out.chunk.rows[0],
            vec![Value::Int64(6), Value::Int64(1), Value::Null, Value::Int64(7)]
        );
    }

    #[test]
    fn mismatched_chunk_schema_is_a_chunk_error() {
        let p = processor(&[], DivisionByZeroPolicy::Null);
        let other = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64)]));
        let err = p.process(Chunk::new(0, 0, other, vec![])).unwrap_err();
        assert!(matches!(err, JobError::Chunk { chunk: 0, .. }));
    }
}
