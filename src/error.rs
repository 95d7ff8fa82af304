use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Convenience result type for expression parsing.
pub type ParseResult<T> = Result<T, ParseError>;
/// Convenience result type for rule-set construction.
pub type RuleResult<T> = Result<T, RuleError>;
/// Convenience result type for row evaluation.
pub type EvalResult<T> = Result<T, EvalError>;
/// Convenience result type for table sources.
pub type SourceResult<T> = Result<T, SourceError>;
/// Convenience result type for report sinks.
pub type SinkResult<T> = Result<T, SinkError>;
/// Convenience result type for a whole generate job.
pub type JobResult<T> = Result<T, JobError>;

/// Error returned by the expression parser.
///
/// Positions are byte offsets into the expression text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Malformed token stream.
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Call to a function outside the whitelist.
    #[error("unknown function '{name}' at offset {position}")]
    UnknownIdentifier { name: String, position: usize },

    /// Reference to a column that is not visible to the expression.
    #[error("unknown column '{name}' at offset {position}")]
    UnknownColumn { name: String, position: usize },

    /// A recognisable construct that the rule grammar does not allow.
    #[error("unsupported operation at offset {position}: {construct}")]
    UnsupportedOperation { construct: String, position: usize },
}

/// Definition-time error for a rule set. Always detected before any row is read.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{rule}': syntax error at offset {position}: {message}")]
    Syntax {
        rule: String,
        position: usize,
        message: String,
    },

    #[error("rule '{rule}': unknown function '{name}'")]
    UnknownIdentifier { rule: String, name: String },

    #[error("rule '{rule}': unsupported operation: {construct}")]
    UnsupportedOperation { rule: String, construct: String },

    #[error("rule '{rule}': unknown column '{column}'")]
    UnknownColumn { rule: String, column: String },

    /// The named rules depend on each other's outputs (in declaration order).
    #[error("cyclic dependency between rules: {}", .rules.join(", "))]
    CyclicDependency { rules: Vec<String> },

    #[error("rule '{rule}' is defined more than once")]
    DuplicateRule { rule: String },

    /// The rule document itself could not be read (bad JSON/YAML, non-string expression, ...).
    #[error("invalid rule document: {message}")]
    InvalidDocument { message: String },

    #[error("io error reading rules: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a [`RuleError`], reported by validation-only callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuleErrorKind {
    SyntaxError,
    UnknownIdentifierError,
    UnsupportedOperationError,
    UnknownColumnError,
    CyclicDependencyError,
    DuplicateRuleError,
    InvalidDocumentError,
}

impl RuleError {
    /// Attach a rule name to a parser error.
    pub fn from_parse(rule: &str, err: ParseError) -> Self {
        let rule = rule.to_string();
        match err {
            ParseError::Syntax { position, message } => Self::Syntax {
                rule,
                position,
                message,
            },
            ParseError::UnknownIdentifier { name, .. } => Self::UnknownIdentifier { rule, name },
            ParseError::UnknownColumn { name, .. } => Self::UnknownColumn { rule, column: name },
            ParseError::UnsupportedOperation { construct, .. } => {
                Self::UnsupportedOperation { rule, construct }
            }
        }
    }

    /// The error classification.
    pub fn kind(&self) -> RuleErrorKind {
        match self {
            Self::Syntax { .. } => RuleErrorKind::SyntaxError,
            Self::UnknownIdentifier { .. } => RuleErrorKind::UnknownIdentifierError,
            Self::UnsupportedOperation { .. } => RuleErrorKind::UnsupportedOperationError,
            Self::UnknownColumn { .. } => RuleErrorKind::UnknownColumnError,
            Self::CyclicDependency { .. } => RuleErrorKind::CyclicDependencyError,
            Self::DuplicateRule { .. } => RuleErrorKind::DuplicateRuleError,
            Self::InvalidDocument { .. } | Self::Io(_) => RuleErrorKind::InvalidDocumentError,
        }
    }

    /// Name of the offending rule (the first member for cycles), if the error concerns one.
    pub fn rule(&self) -> Option<&str> {
        match self {
            Self::Syntax { rule, .. }
            | Self::UnknownIdentifier { rule, .. }
            | Self::UnsupportedOperation { rule, .. }
            | Self::UnknownColumn { rule, .. }
            | Self::DuplicateRule { rule } => Some(rule),
            Self::CyclicDependency { rules } => rules.first().map(String::as_str),
            Self::InvalidDocument { .. } | Self::Io(_) => None,
        }
    }
}

/// Row-level evaluation error. Recorded against the row; the chunk keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Non-numeric operand to an arithmetic operator or numeric function.
    #[error("type mismatch: '{operation}' expects numeric operands, found {found}")]
    TypeMismatch {
        operation: &'static str,
        found: &'static str,
    },

    /// Division by zero under [`crate::expr::DivisionByZeroPolicy::Fail`].
    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid argument to {function}(): {message}")]
    InvalidArgument {
        function: &'static str,
        message: String,
    },
}

/// Error type returned by table sources and reference loading.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "excel")]
    /// Excel read error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// CSV read error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON read error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parquet read error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The input does not conform to the provided schema (missing columns, etc.).
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// The source format could not be determined or is not enabled.
    #[error("unsupported source format: {message}")]
    UnsupportedFormat { message: String },

    /// A row could not be read into the schema (wrong field count, unparseable value).
    #[error("malformed row at line {line} column '{column}': {message} (raw='{raw}')")]
    MalformedRow {
        line: u64,
        column: String,
        raw: String,
        message: String,
    },

    /// The reference data contains the same join key more than once.
    #[error("ambiguous join key {key} in reference data (lines {first_line} and {duplicate_line})")]
    AmbiguousJoinKey {
        key: String,
        first_line: u64,
        duplicate_line: u64,
    },
}

/// Error type returned by report sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("xlsx error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    /// The staged output could not be moved to its final name.
    #[error("failed to publish report: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// A chunk does not match the schema the sink was opened with.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("unsupported output encoding '{name}' (expected csv, xlsx or json)")]
    UnsupportedEncoding { name: String },
}

/// Terminal failure of a generate job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid options: {message}")]
    InvalidOptions { message: String },

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// A chunk could not be processed at all (as opposed to per-row failures).
    #[error("chunk {chunk} failed: {message}")]
    Chunk { chunk: usize, message: String },

    #[error("worker panicked while processing chunk {chunk}: {message}")]
    WorkerPanicked { chunk: usize, message: String },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("job exceeded its timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("job was cancelled")]
    Cancelled,
}
