//! Left-outer join of a chunked primary source against bounded reference data.
//!
//! The reference [`DataSet`] is indexed once by its key column and shared read-only. Each primary
//! chunk is enriched row by row: matched rows get the reference row's values appended, unmatched
//! rows get nulls. The reference key column itself is not repeated in the output.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use crate::error::{SourceError, SourceResult};
use crate::types::{Chunk, DataSet, Field, Schema, SchemaRef, Value};

use super::TableSource;

/// Supported join kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    LeftOuter,
}

/// What to do when the reference data holds the same key more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateKeyPolicy {
    /// Fail with [`SourceError::AmbiguousJoinKey`].
    #[default]
    Reject,
    /// Keep the first row with the key and ignore the rest.
    FirstMatch,
}

/// How primary rows are matched with reference rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    /// Key column in the primary source.
    pub left_key: String,
    /// Key column in the reference data.
    pub right_key: String,
    pub kind: JoinKind,
    /// Appended to reference column names that collide with existing columns.
    pub reference_suffix: String,
    pub duplicate_keys: DuplicateKeyPolicy,
}

impl JoinSpec {
    /// Join on a column with the same name on both sides.
    pub fn on(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(key.clone(), key)
    }

    pub fn new(left_key: impl Into<String>, right_key: impl Into<String>) -> Self {
        Self {
            left_key: left_key.into(),
            right_key: right_key.into(),
            kind: JoinKind::default(),
            reference_suffix: "_ref".to_string(),
            duplicate_keys: DuplicateKeyPolicy::default(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.reference_suffix = suffix.into();
        self
    }

    pub fn with_duplicate_keys(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_keys = policy;
        self
    }
}

/// Hashable form of a join key. Integral floats compare equal to integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Int(i64),
    Float(u64),
    Bool(bool),
    Text(String),
}

impl JoinKey {
    /// `None` for values that never match (null, NaN).
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Null => None,
            Value::Int64(i) => Some(Self::Int(*i)),
            Value::Float64(f) if f.is_nan() => None,
            Value::Float64(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(Self::Int(*f as i64)),
            Value::Float64(f) => Some(Self::Float(f.to_bits())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Utf8(s) => Some(Self::Text(s.clone())),
        }
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "'{s}'"),
        }
    }
}

/// Reference rows indexed by join key, plus the columns they contribute to joined rows.
#[derive(Debug)]
pub struct ReferenceIndex {
    data: DataSet,
    by_key: HashMap<JoinKey, usize>,
    /// Reference columns appended to primary rows (every column but the key).
    carried: Vec<usize>,
}

impl ReferenceIndex {
    pub fn build(data: DataSet, spec: &JoinSpec) -> SourceResult<Self> {
        let key_idx = data
            .schema
            .index_of(&spec.right_key)
            .ok_or_else(|| SourceError::SchemaMismatch {
                message: format!("join key '{}' is not a reference column", spec.right_key),
            })?;

        let mut by_key = HashMap::with_capacity(data.row_count());
        for (idx, row) in data.rows.iter().enumerate() {
            let Some(key) = row.get(key_idx).and_then(JoinKey::from_value) else {
                continue;
            };
            match by_key.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
                Entry::Occupied(existing) => {
                    if spec.duplicate_keys == DuplicateKeyPolicy::Reject {
                        return Err(SourceError::AmbiguousJoinKey {
                            key: existing.key().to_string(),
                            first_line: data.line_of(*existing.get()),
                            duplicate_line: data.line_of(idx),
                        });
                    }
                }
            }
        }

        let carried = (0..data.schema.len()).filter(|&i| i != key_idx).collect();
        tracing::debug!(keys = by_key.len(), rows = data.row_count(), "built reference index");
        Ok(Self {
            data,
            by_key,
            carried,
        })
    }

    /// Number of distinct indexed keys.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn lookup(&self, key: &Value) -> Option<&[Value]> {
        let idx = *self.by_key.get(&JoinKey::from_value(key)?)?;
        self.data.rows.get(idx).map(Vec::as_slice)
    }
}

/// A [`TableSource`] that left-joins every chunk of `inner` against a [`ReferenceIndex`].
pub struct JoinedSource<S> {
    inner: S,
    index: Arc<ReferenceIndex>,
    left_key: usize,
    schema: SchemaRef,
}

impl<S: TableSource> JoinedSource<S> {
    pub fn new(inner: S, index: Arc<ReferenceIndex>, spec: &JoinSpec) -> SourceResult<Self> {
        let primary = inner.schema();
        let left_key = primary
            .index_of(&spec.left_key)
            .ok_or_else(|| SourceError::SchemaMismatch {
                message: format!("join key '{}' is not a primary column", spec.left_key),
            })?;
        let schema = Arc::new(join_schema(primary, &index.data.schema, spec)?);
        Ok(Self {
            inner,
            index,
            left_key,
            schema,
        })
    }
}

/// Schema of joined rows: primary fields, then every reference field except the key.
///
/// Reference names that collide get `reference_suffix` appended until they are unique. Only the
/// schemas are consulted, so this can run before any data is read.
pub fn join_schema(primary: &Schema, reference: &Schema, spec: &JoinSpec) -> SourceResult<Schema> {
    if primary.index_of(&spec.left_key).is_none() {
        return Err(SourceError::SchemaMismatch {
            message: format!("join key '{}' is not a primary column", spec.left_key),
        });
    }
    let key_idx = reference
        .index_of(&spec.right_key)
        .ok_or_else(|| SourceError::SchemaMismatch {
            message: format!("join key '{}' is not a reference column", spec.right_key),
        })?;
    let suffix = if spec.reference_suffix.is_empty() {
        "_ref"
    } else {
        spec.reference_suffix.as_str()
    };

    let mut fields = primary.fields.clone();
    for (i, field) in reference.fields.iter().enumerate() {
        if i == key_idx {
            continue;
        }
        let mut name = field.name.clone();
        while fields.iter().any(|f| f.name == name) {
            name.push_str(suffix);
        }
        fields.push(Field::new(name, field.data_type));
    }
    Ok(Schema::new(fields))
}

impl<S: TableSource> TableSource for JoinedSource<S> {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn next_chunk(&mut self) -> SourceResult<Option<Chunk>> {
        let Some(chunk) = self.inner.next_chunk()? else {
            return Ok(None);
        };
        let width = self.schema.len();
        let rows = chunk
            .rows
            .into_iter()
            .map(|mut row| {
                row.reserve(width.saturating_sub(row.len()));
                let matched = row.get(self.left_key).and_then(|k| self.index.lookup(k));
                match matched {
                    Some(reference) => {
                        let extra: Vec<Value> = self.index.carried.iter().map(|&i| reference[i].clone()).collect();
                        row.extend(extra);
                    }
                    None => row.resize(width, Value::Null),
                }
                row
            })
            .collect();
        Ok(Some(Chunk::new(chunk.ordinal, chunk.first_row, Arc::clone(&self.schema), rows)))
    }

    fn rewind(&mut self) -> SourceResult<()> {
        self.inner.rewind()
    }
}
