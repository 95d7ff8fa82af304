//! Core data model types for report generation.
//!
//! Sources produce [`Chunk`]s of typed [`Value`] rows described by a user-provided [`Schema`]
//! (a list of typed [`Field`]s). Reference data for joins is held in a [`DataSet`].

use std::fmt;
use std::sync::Arc;

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Utf8 => "utf8",
        };
        f.write_str(name)
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A list of fields describing the shape of a table.
///
/// Column names are unique. A schema is immutable once a source starts producing chunks; it is
/// shared between chunks as a [`SchemaRef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

/// Shared, read-only schema handle.
pub type SchemaRef = Arc<Schema>;

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns the field with the given name, if present.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the first column name that appears more than once, if any.
    pub fn duplicate_name(&self) -> Option<&str> {
        for (i, f) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|prev| prev.name == f.name) {
                return Some(f.name.as_str());
            }
        }
        None
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Whether this value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The data type of a non-null value.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Int64(_) => Some(DataType::Int64),
            Self::Float64(_) => Some(DataType::Float64),
            Self::Bool(_) => Some(DataType::Bool),
            Self::Utf8(_) => Some(DataType::Utf8),
        }
    }

    /// Numeric view of the value (integers widen to `f64`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerce a value into `target` where the conversion is a widening one.
    ///
    /// Only `Int64 -> Float64` is performed; every other combination is returned unchanged.
    pub fn coerce_to(self, target: DataType) -> Value {
        match (self, target) {
            (Value::Int64(v), DataType::Float64) => Value::Float64(v as f64),
            (other, _) => other,
        }
    }

    /// Short name of the value's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::Bool(_) => "bool",
            Self::Utf8(_) => "utf8",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Utf8(s) => f.write_str(s),
        }
    }
}

/// A bounded, ordered batch of rows: the unit of parallel work.
///
/// `ordinal` is the chunk's position in the source stream (starting at 0). `first_row` is the
/// stream-wide index of the chunk's first row.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position in the source stream.
    pub ordinal: usize,
    /// Zero-based stream index of `rows[0]`.
    pub first_row: usize,
    /// Shape of every row.
    pub schema: SchemaRef,
    /// Row-major value storage, in schema field order.
    pub rows: Vec<Vec<Value>>,
}

impl Chunk {
    /// Create a chunk.
    pub fn new(ordinal: usize, first_row: usize, schema: SchemaRef, rows: Vec<Vec<Value>>) -> Self {
        Self {
            ordinal,
            first_row,
            schema,
            rows,
        }
    }

    /// Number of rows in the chunk.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields. Used for
/// bounded reference data, which is loaded once rather than chunked.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
    /// Source line of each row (for diagnostics), parallel to `rows` when known.
    pub lines: Vec<u64>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    ///
    /// Row `i` is attributed to line `i + 1`.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        let lines = (1..=rows.len() as u64).collect();
        Self {
            schema,
            rows,
            lines,
        }
    }

    /// Create a dataset whose rows carry explicit source line numbers.
    pub fn with_lines(schema: Schema, rows: Vec<Vec<Value>>, lines: Vec<u64>) -> Self {
        debug_assert_eq!(rows.len(), lines.len());
        Self {
            schema,
            rows,
            lines,
        }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Source line of row `idx`, falling back to its 1-based position.
    pub fn line_of(&self, idx: usize) -> u64 {
        self.lines.get(idx).copied().unwrap_or(idx as u64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::{DataType, Field, Schema, Value};

    #[test]
    fn schema_index_of_works() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("active", DataType::Bool),
            Field::new("name", DataType::Utf8),
        ]);
        assert_eq!(schema.index_of("id"), Some(0));
        assert_eq!(schema.index_of("name"), Some(2));
        assert_eq!(schema.index_of("missing"), None);
        assert_eq!(schema.duplicate_name(), None);
    }

    #[test]
    fn duplicate_names_are_detected() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Int64),
            Field::new("a", DataType::Utf8),
        ]);
        assert_eq!(schema.duplicate_name(), Some("a"));
    }

    #[test]
    fn coerce_only_widens_integers() {
        assert_eq!(Value::Int64(3).coerce_to(DataType::Float64), Value::Float64(3.0));
        assert_eq!(Value::Float64(1.5).coerce_to(DataType::Int64), Value::Float64(1.5));
        assert_eq!(Value::Null.coerce_to(DataType::Float64), Value::Null);
        assert_eq!(
            Value::Utf8("x".to_string()).coerce_to(DataType::Float64),
            Value::Utf8("x".to_string())
        );
    }

    #[test]
    fn display_renders_null_as_empty() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Float64(2.0).to_string(), "2");
        assert_eq!(Value::Float64(0.25).to_string(), "0.25");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }
}
