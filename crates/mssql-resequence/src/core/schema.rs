//! Schema types for the parent table, its dependents, and its layout.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::identifier::qualify_mssql;
use crate::error::Result;

/// Schema used when a name does not carry one.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema name (e.g. "dbo").
    pub schema: String,
    /// Table name.
    pub name: String,
}

impl TableRef {
    /// Create a table reference from its parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `table` or `schema.table`, falling back to `default_schema`.
    pub fn parse(text: &str, default_schema: &str) -> Self {
        match text.trim().split_once('.') {
            Some((schema, name)) if !schema.trim().is_empty() => {
                Self::new(schema.trim(), name.trim())
            }
            Some((_, name)) => Self::new(default_schema, name.trim()),
            None => Self::new(default_schema, text.trim()),
        }
    }

    /// `[schema].[table]`, validated and escaped.
    pub fn qualified(&self) -> Result<String> {
        qualify_mssql(&self.schema, &self.name)
    }

    /// Table names compare case-insensitively under SQL Server's default collation.
    pub fn same_table(&self, other: &TableRef) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema) && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A column in another table whose values point at the parent's identifier column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependentReference {
    /// Dependent table.
    pub table: TableRef,
    /// Foreign key column in the dependent table.
    pub column: String,
}

impl DependentReference {
    /// Create a dependent reference from its parts.
    pub fn new(table: TableRef, column: impl Into<String>) -> Self {
        Self {
            table,
            column: column.into(),
        }
    }

    /// Parse a `Table.Column` or `Schema.Table.Column` entry.
    ///
    /// Returns `None` for entries without a separator or with an empty
    /// segment; callers skip those rather than failing.
    pub fn parse(text: &str, default_schema: &str) -> Option<Self> {
        let parts: Vec<&str> = text.trim().splitn(3, '.').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            [table, column] => Some(Self::new(TableRef::new(default_schema, *table), *column)),
            [schema, table, column] => Some(Self::new(TableRef::new(*schema, *table), *column)),
            _ => None,
        }
    }

    /// Parse every entry, silently dropping malformed ones.
    pub fn parse_all<I, S>(entries: I, default_schema: &str) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        entries
            .into_iter()
            .filter_map(|s| Self::parse(s.as_ref(), default_schema))
            .collect()
    }

    /// Same table and column, ignoring case.
    pub fn same_target(&self, other: &DependentReference) -> bool {
        self.table.same_table(&other.table) && self.column.eq_ignore_ascii_case(&other.column)
    }
}

impl fmt::Display for DependentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// How the identifier column gets its values on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// The store assigns the value (IDENTITY); explicit values need an override.
    SystemGenerated,
    /// The caller supplies the value.
    CallerAssigned,
}

impl GenerationMode {
    pub fn from_identity(is_identity: bool) -> Self {
        if is_identity {
            GenerationMode::SystemGenerated
        } else {
            GenerationMode::CallerAssigned
        }
    }

    pub fn is_system_generated(self) -> bool {
        self == GenerationMode::SystemGenerated
    }
}

/// Resolved column layout of the parent table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLayout {
    /// All columns in definition order.
    pub columns: Vec<String>,
    /// The identifier column, spelled as the catalog spells it.
    pub id_column: String,
    /// Every column except the identifier, in definition order.
    pub other_columns: Vec<String>,
    /// Whether the identifier is assigned by the store.
    pub generation: GenerationMode,
}

impl ParentLayout {
    /// Split `columns` around `id_column` (case-insensitive).
    ///
    /// Returns `None` when the identifier column is not among `columns`.
    pub fn resolve(columns: Vec<String>, id_column: &str, generation: GenerationMode) -> Option<Self> {
        let id = columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(id_column.trim()))?
            .clone();
        let other_columns = columns
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case(&id))
            .cloned()
            .collect();
        Some(Self {
            columns,
            id_column: id,
            other_columns,
            generation,
        })
    }
}
