//! `rule-report-engine` turns tabular input into reports by applying user-defined column rules.
//!
//! A job reads a primary table in chunks, optionally left-joins each chunk against bounded
//! reference data, evaluates a set of named arithmetic rules for every row, and writes the result
//! as CSV, JSON or XLSX. Chunks are evaluated in parallel on a worker pool and written strictly in
//! input order.
//!
//! The primary entrypoints are [`job::generate`] (or [`job::ReportEngine`] for observers and
//! cancellation) and [`job::validate_rules`], which checks rules without reading any rows.
//!
//! ## Inputs (auto-detected by extension)
//!
//! - **CSV**: `.csv`
//! - **JSON**: `.json` (array-of-objects) and `.ndjson` / `.jsonl` (newline-delimited objects)
//! - **Parquet**: `.parquet`, `.pq`
//! - **Excel/workbooks** (requires the Cargo feature `excel`): `.xlsx`, `.xls`, `.xlsm`, `.xlsb`, `.ods`
//!
//! Every source is read against a caller-supplied [`types::Schema`]. Empty cells, empty strings
//! and explicit JSON `null` map to [`types::Value::Null`].
//!
//! ## Rules
//!
//! A rule maps an output column name to an expression over columns and other rules' outputs:
//! numbers, `+ - * /`, unary minus, parentheses and the functions `max`, `min`, `sum`, `abs` and
//! `round`. Nothing else is accepted, so rule text can never run arbitrary code. Rules may appear
//! in any order; they are evaluated in dependency order.
//!
//! ## Quick example
//!
//! ```no_run
//! use rule_report_engine::config::GenerateOptions;
//! use rule_report_engine::job::{generate, GenerateRequest, OutputSpec};
//! use rule_report_engine::rules::RuleDefinitions;
//! use rule_report_engine::source::SourceSpec;
//! use rule_report_engine::types::{DataType, Field, Schema};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema::new(vec![
//!     Field::new("price", DataType::Float64),
//!     Field::new("qty", DataType::Int64),
//! ]);
//! let rules = RuleDefinitions::from_yaml_str("total: price * qty\ndiscount: max(0, total * 0.1)\n")?;
//! let request = GenerateRequest::new(
//!     SourceSpec::new("orders.csv", schema),
//!     rules,
//!     OutputSpec::from_path("report.xlsx")?,
//! );
//! let outcome = generate(&request, GenerateOptions::from_env())?;
//! println!("rows={} failures={}", outcome.rows_written, outcome.row_failure_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: schema, values, chunks and in-memory datasets
//! - [`expr`]: expression parser and evaluator
//! - [`rules`]: rule documents and dependency resolution
//! - [`source`]: chunked table sources and the reference join
//! - [`execution`]: chunk processing, ordered parallel coordination, metrics
//! - [`sink`]: staged report writers
//! - [`job`]: `generate` and validation entry points
//! - [`config`]: job options and environment overrides
//! - [`error`]: error types

pub mod config;
pub mod error;
pub mod execution;
pub mod expr;
pub mod job;
pub mod rules;
pub mod sink;
pub mod source;
pub mod types;

pub use config::GenerateOptions;
pub use error::{JobError, JobResult, RuleError, SinkError, SourceError};
pub use execution::CancellationToken;
pub use job::{GenerateRequest, JobOutcome, OutputSpec, ReportEngine, RuleDiagnostic, generate, validate_rules};
