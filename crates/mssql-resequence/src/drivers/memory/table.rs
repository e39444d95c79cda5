//! Tables, values, and foreign keys held by [`MemoryStore`](super::MemoryStore).

use crate::core::schema::TableRef;

/// A cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An in-memory table: ordered columns, rows, an optional identity column,
/// and the enabled/disabled state of its declared constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub(super) columns: Vec<String>,
    pub(super) identity: Option<String>,
    pub(super) next_identity: i64,
    pub(super) rows: Vec<Vec<Value>>,
    pub(super) constraints_enabled: bool,
}

impl MemoryTable {
    /// Create an empty table with `columns` in definition order.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            identity: None,
            next_identity: 1,
            rows: Vec::new(),
            constraints_enabled: true,
        }
    }

    /// Mark `column` as IDENTITY.
    pub fn with_identity(mut self, column: &str) -> Self {
        self.identity = Some(column.to_string());
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Value the next generated identity would receive.
    pub fn next_identity(&self) -> i64 {
        self.next_identity
    }

    pub fn constraints_enabled(&self) -> bool {
        self.constraints_enabled
    }

    /// Index of `column`, ignoring case.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Every value of `column` in row order.
    pub fn column_values(&self, column: &str) -> Vec<Value> {
        match self.column_index(column) {
            Some(idx) => self.rows.iter().map(|r| r[idx].clone()).collect(),
            None => Vec::new(),
        }
    }

    pub(super) fn is_identity(&self, column: &str) -> bool {
        self.identity
            .as_deref()
            .is_some_and(|id| id.eq_ignore_ascii_case(column))
    }

    pub(super) fn contains_int(&self, column_idx: usize, value: i64) -> bool {
        self.rows
            .iter()
            .any(|r| r[column_idx].as_int() == Some(value))
    }
}

/// A declared single-column foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing (dependent) table.
    pub table: TableRef,
    /// Referencing column.
    pub column: String,
    /// Referenced (parent) table.
    pub references: TableRef,
    /// Referenced column.
    pub referenced_column: String,
}

impl ForeignKey {
    pub fn new(
        table: TableRef,
        column: impl Into<String>,
        references: TableRef,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            table,
            column: column.into(),
            references,
            referenced_column: referenced_column.into(),
        }
    }
}
