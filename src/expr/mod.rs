//! Rule expression language: a closed arithmetic grammar with a fixed function whitelist.
//!
//! - [`lexer`] splits text into tokens and rejects constructs outside the grammar
//! - [`parser`] builds an [`Expr`] tree, resolving columns against a [`ColumnScope`]
//! - [`eval`] evaluates a tree against one row
//!
//! ```rust
//! use rule_report_engine::expr::{parse_expression, Evaluator};
//! use rule_report_engine::types::{DataType, Field, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     Field::new("price", DataType::Float64),
//!     Field::new("qty", DataType::Int64),
//! ]);
//! let expr = parse_expression("round(price * qty, 1)", &schema).unwrap();
//! let out = Evaluator::default()
//!     .evaluate(&expr, &[Value::Float64(2.25), Value::Int64(3)])
//!     .unwrap();
//! assert_eq!(out, Value::Float64(6.8));
//! ```

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, Function};
pub use eval::{DivisionByZeroPolicy, Evaluator};
pub use parser::{parse_expression, ColumnScope};
