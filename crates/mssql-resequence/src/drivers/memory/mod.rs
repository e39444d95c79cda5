//! In-process store.
//!
//! [`MemoryStore`] implements [`ResequenceStore`] over plain Rust collections
//! with the semantics the SQL Server driver relies on:
//!
//! - transactions snapshot every table on `begin` and restore it on `rollback`
//! - constraint enable/disable is table state and rolls back with the data
//! - foreign keys are enforced on update and on parent delete while enabled,
//!   and fully revalidated on restore
//! - explicit identity insertion is session state and survives rollback
//!
//! Failures can be injected with [`MemoryStore::fail_at`].

mod table;

pub use table::{ForeignKey, MemoryTable, Value};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::core::mapping::IdentifierMapping;
use crate::core::schema::{ParentLayout, TableRef};
use crate::core::traits::{ColumnRewrite, ResequenceStore};
use crate::error::{ResequenceError, Result};

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Identity metadata comes back inconclusive.
    IdentityMetadata,
    /// Suspending constraints fails (lock timeout).
    SuspendConstraints,
    /// Rewriting a dependent column fails (deadlock victim).
    Rewrite,
    /// Reinserting the parent row at this 0-based position violates a constraint.
    InsertRow(usize),
    /// The next attempt to turn explicit identity insertion off fails.
    ReleaseExplicitIds,
    /// Commit fails.
    Commit,
}

/// In-process [`ResequenceStore`].
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    tables: BTreeMap<TableRef, MemoryTable>,
    foreign_keys: Vec<ForeignKey>,
    snapshot: Option<BTreeMap<TableRef, MemoryTable>>,
    staged: Option<IdentifierMapping>,
    captured: Option<BTreeMap<i64, Vec<Value>>>,
    explicit_ids: Option<TableRef>,
    explicit_id_engagements: usize,
    failures: Vec<FailurePoint>,
    operations: Vec<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryStore {
    /// Create an empty store; `name` is reported as the connection target.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: BTreeMap::new(),
            foreign_keys: Vec::new(),
            snapshot: None,
            staged: None,
            captured: None,
            explicit_ids: None,
            explicit_id_engagements: 0,
            failures: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Add (or replace) a table.
    pub fn create_table(&mut self, table: TableRef, definition: MemoryTable) -> &mut Self {
        self.tables.insert(table, definition);
        self
    }

    /// Declare a foreign key.
    pub fn add_foreign_key(&mut self, fk: ForeignKey) -> &mut Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Seed a full row without constraint checks, like a bulk load.
    ///
    /// Identity columns take the supplied value and advance the seed past it.
    pub fn insert_row<I, V>(&mut self, table: &TableRef, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let key = self.key(table)?;
        let def = self.tables.get_mut(&key).ok_or_else(|| missing_table(table))?;
        let row: Vec<Value> = values.into_iter().map(Into::into).collect();
        if row.len() != def.columns.len() {
            return Err(ResequenceError::Schema(format!(
                "{} has {} columns, row has {} values",
                table,
                def.columns.len(),
                row.len()
            )));
        }
        if let Some(idx) = def.identity.as_deref().and_then(|c| def.column_index(c)) {
            if let Some(v) = row[idx].as_int() {
                def.next_identity = def.next_identity.max(v.saturating_add(1));
            }
        }
        def.rows.push(row);
        Ok(())
    }

    /// Remove rows whose `column` equals `value`, without constraint checks.
    pub fn delete_where(&mut self, table: &TableRef, column: &str, value: i64) -> Result<usize> {
        let key = self.key(table)?;
        let def = self.tables.get_mut(&key).ok_or_else(|| missing_table(table))?;
        let idx = def
            .column_index(column)
            .ok_or_else(|| missing_column(table, column))?;
        let before = def.rows.len();
        def.rows.retain(|r| r[idx].as_int() != Some(value));
        Ok(before - def.rows.len())
    }

    /// Make every later call at `point` fail.
    ///
    /// [`FailurePoint::ReleaseExplicitIds`] fires once and is then consumed.
    pub fn fail_at(&mut self, point: FailurePoint) -> &mut Self {
        self.failures.push(point);
        self
    }

    pub fn table(&self, table: &TableRef) -> Option<&MemoryTable> {
        self.tables
            .iter()
            .find(|(k, _)| k.same_table(table))
            .map(|(_, v)| v)
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// How many times explicit identity insertion was turned on.
    pub fn explicit_id_engagements(&self) -> usize {
        self.explicit_id_engagements
    }

    /// Whether a mapping is staged.
    pub fn has_staged_mapping(&self) -> bool {
        self.staged.is_some()
    }

    /// Store operations in call order (`begin`, `suspend dbo.t`, ...).
    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    fn key(&self, table: &TableRef) -> Result<TableRef> {
        self.tables
            .keys()
            .find(|k| k.same_table(table))
            .cloned()
            .ok_or_else(|| missing_table(table))
    }

    fn failing(&self, point: FailurePoint) -> bool {
        self.failures.contains(&point)
    }

    fn take_failure(&mut self, point: FailurePoint) -> bool {
        match self.failures.iter().position(|p| *p == point) {
            Some(pos) => {
                self.failures.remove(pos);
                true
            }
            None => false,
        }
    }

    fn record(&mut self, op: String) {
        debug!("memory store: {}", op);
        self.operations.push(op);
    }

    /// Values of `fk.references.referenced_column` that exist right now.
    fn parent_values(&self, fk: &ForeignKey) -> Result<HashSet<i64>> {
        let parent = self
            .table(&fk.references)
            .ok_or_else(|| missing_table(&fk.references))?;
        let idx = parent
            .column_index(&fk.referenced_column)
            .ok_or_else(|| missing_column(&fk.references, &fk.referenced_column))?;
        Ok(parent.rows.iter().filter_map(|r| r[idx].as_int()).collect())
    }

    /// First value in `fk.table.fk.column` with no matching parent row.
    fn first_orphan(&self, fk: &ForeignKey) -> Result<Option<i64>> {
        let parent_values = self.parent_values(fk)?;
        let child = self.table(&fk.table).ok_or_else(|| missing_table(&fk.table))?;
        let idx = child
            .column_index(&fk.column)
            .ok_or_else(|| missing_column(&fk.table, &fk.column))?;
        Ok(child
            .rows
            .iter()
            .filter_map(|r| r[idx].as_int())
            .find(|v| !parent_values.contains(v)))
    }

    fn enforced_fks_from(&self, table: &TableRef) -> Vec<ForeignKey> {
        let enabled = self.table(table).is_some_and(|t| t.constraints_enabled);
        if !enabled {
            return Vec::new();
        }
        self.foreign_keys
            .iter()
            .filter(|fk| fk.table.same_table(table))
            .cloned()
            .collect()
    }
}

fn missing_table(table: &TableRef) -> ResequenceError {
    ResequenceError::Schema(format!("Invalid object name '{}'", table))
}

fn missing_column(table: &TableRef, column: &str) -> ResequenceError {
    ResequenceError::Schema(format!("Invalid column name '{}' in {}", column, table))
}

fn fk_conflict(fk: &ForeignKey, value: i64) -> ResequenceError {
    ResequenceError::constraint(
        fk.table.to_string(),
        format!(
            "FOREIGN KEY {}.{} -> {}.{} has no parent row for value {}",
            fk.table, fk.column, fk.references, fk.referenced_column, value
        ),
    )
}

#[async_trait]
impl ResequenceStore for MemoryStore {
    fn target(&self) -> String {
        self.name.clone()
    }

    async fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(ResequenceError::Transaction(
                "a transaction is already open on this session".into(),
            ));
        }
        self.snapshot = Some(self.tables.clone());
        self.record("begin".into());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.failing(FailurePoint::Commit) {
            return Err(ResequenceError::Transaction(
                "commit failed: connection reset".into(),
            ));
        }
        if self.snapshot.take().is_none() {
            return Err(ResequenceError::Transaction(
                "COMMIT has no corresponding BEGIN TRANSACTION".into(),
            ));
        }
        self.record("commit".into());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
            self.record("rollback".into());
        }
        self.captured = None;
        Ok(())
    }

    async fn list_columns(&mut self, table: &TableRef) -> Result<Vec<String>> {
        Ok(self
            .table(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn is_system_generated(&mut self, table: &TableRef, column: &str) -> Result<bool> {
        if self.failing(FailurePoint::IdentityMetadata) {
            return Err(ResequenceError::Schema(format!(
                "identity metadata for {}.{} is inconclusive",
                table, column
            )));
        }
        let def = self.table(table).ok_or_else(|| missing_table(table))?;
        if def.column_index(column).is_none() {
            return Err(missing_column(table, column));
        }
        Ok(def.is_identity(column))
    }

    async fn read_identifiers(&mut self, table: &TableRef, id_column: &str) -> Result<Vec<i64>> {
        let def = self.table(table).ok_or_else(|| missing_table(table))?;
        let idx = def
            .column_index(id_column)
            .ok_or_else(|| missing_column(table, id_column))?;

        let mut ids = Vec::with_capacity(def.rows.len());
        for row in &def.rows {
            match &row[idx] {
                Value::Int(v) => ids.push(*v),
                Value::Null => {
                    return Err(ResequenceError::Schema(format!(
                        "NULL identifier in {}.{}",
                        table, id_column
                    )))
                }
                other => {
                    return Err(ResequenceError::Schema(format!(
                        "non-integer identifier {:?} in {}.{}",
                        other, table, id_column
                    )))
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn stage_mapping(
        &mut self,
        table: &TableRef,
        _id_column: &str,
        mapping: &IdentifierMapping,
    ) -> Result<()> {
        self.staged = Some(mapping.clone());
        self.record(format!("stage {}", table));
        Ok(())
    }

    async fn release_staging(&mut self) -> Result<()> {
        self.staged = None;
        self.captured = None;
        Ok(())
    }

    async fn suspend_constraints(&mut self, table: &TableRef) -> Result<()> {
        if self.failing(FailurePoint::SuspendConstraints) {
            return Err(ResequenceError::Transaction(format!(
                "lock request time out period exceeded on {}",
                table
            )));
        }
        let key = self.key(table)?;
        if let Some(def) = self.tables.get_mut(&key) {
            def.constraints_enabled = false;
        }
        self.record(format!("suspend {}", key));
        Ok(())
    }

    async fn restore_constraints(&mut self, table: &TableRef) -> Result<()> {
        let key = self.key(table)?;
        if let Some(def) = self.tables.get_mut(&key) {
            def.constraints_enabled = true;
        }
        self.record(format!("restore {}", key));

        for fk in self.enforced_fks_from(&key) {
            if let Some(orphan) = self.first_orphan(&fk)? {
                return Err(fk_conflict(&fk, orphan));
            }
        }
        Ok(())
    }

    async fn rewrite_column(
        &mut self,
        table: &TableRef,
        column: &str,
        mapping: &IdentifierMapping,
    ) -> Result<ColumnRewrite> {
        if self.failing(FailurePoint::Rewrite) {
            return Err(ResequenceError::Transaction(format!(
                "transaction was deadlocked while updating {}",
                table
            )));
        }
        let key = self.key(table)?;
        let def = self.tables.get(&key).ok_or_else(|| missing_table(table))?;
        let idx = def
            .column_index(column)
            .ok_or_else(|| missing_column(table, column))?;

        let mut rows = def.rows.clone();
        let mut counts = ColumnRewrite::default();
        let mut written = Vec::new();
        for row in rows.iter_mut() {
            if row[idx].is_null() {
                continue;
            }
            match row[idx].as_int().and_then(|old| mapping.get(old)) {
                Some(new) => {
                    row[idx] = Value::Int(new);
                    written.push(new);
                    counts.rewritten += 1;
                }
                None => counts.unmapped += 1,
            }
        }

        // Statement-level check while the table's constraints are enforced.
        for fk in self.enforced_fks_from(&key) {
            if !fk.column.eq_ignore_ascii_case(column) {
                continue;
            }
            let parent_values = self.parent_values(&fk)?;
            if let Some(v) = written.iter().find(|v| !parent_values.contains(v)) {
                return Err(fk_conflict(&fk, *v));
            }
        }

        if let Some(def) = self.tables.get_mut(&key) {
            def.rows = rows;
        }
        self.record(format!("rewrite {}.{}", key, column));
        Ok(counts)
    }

    async fn capture_rows(&mut self, table: &TableRef, layout: &ParentLayout) -> Result<u64> {
        let def = self.table(table).ok_or_else(|| missing_table(table))?;
        let id_idx = def
            .column_index(&layout.id_column)
            .ok_or_else(|| missing_column(table, &layout.id_column))?;
        let other_idx = layout
            .other_columns
            .iter()
            .map(|c| def.column_index(c).ok_or_else(|| missing_column(table, c)))
            .collect::<Result<Vec<usize>>>()?;

        let mut captured = BTreeMap::new();
        for row in &def.rows {
            let id = row[id_idx].as_int().ok_or_else(|| {
                ResequenceError::Schema(format!("non-integer identifier in {}", table))
            })?;
            let values = other_idx.iter().map(|&i| row[i].clone()).collect();
            if captured.insert(id, values).is_some() {
                return Err(ResequenceError::Schema(format!(
                    "duplicate identifier value {} in {}",
                    id, table
                )));
            }
        }

        let count = captured.len() as u64;
        self.captured = Some(captured);
        self.record(format!("capture {}", table));
        Ok(count)
    }

    async fn delete_rows(&mut self, table: &TableRef) -> Result<u64> {
        let key = self.key(table)?;

        // Enforced foreign keys pointing at this table block the delete.
        let referencing: Vec<ForeignKey> = self
            .foreign_keys
            .iter()
            .filter(|fk| fk.references.same_table(&key))
            .filter(|fk| self.table(&fk.table).is_some_and(|t| t.constraints_enabled))
            .cloned()
            .collect();
        for fk in &referencing {
            let child = self.table(&fk.table).ok_or_else(|| missing_table(&fk.table))?;
            let idx = child
                .column_index(&fk.column)
                .ok_or_else(|| missing_column(&fk.table, &fk.column))?;
            if let Some(v) = child.rows.iter().find_map(|r| r[idx].as_int()) {
                return Err(ResequenceError::constraint(
                    key.to_string(),
                    format!(
                        "DELETE conflicted with REFERENCE constraint from {}.{} (value {})",
                        fk.table, fk.column, v
                    ),
                ));
            }
        }

        let def = self.tables.get_mut(&key).ok_or_else(|| missing_table(table))?;
        let deleted = def.rows.len() as u64;
        def.rows.clear();
        self.record(format!("delete {}", key));
        Ok(deleted)
    }

    async fn insert_remapped(
        &mut self,
        table: &TableRef,
        layout: &ParentLayout,
        mapping: &IdentifierMapping,
    ) -> Result<u64> {
        let key = self.key(table)?;
        let captured = self.captured.take().ok_or_else(|| {
            ResequenceError::Schema(format!("no captured rows to reinsert into {}", table))
        })?;
        let override_on = self
            .explicit_ids
            .as_ref()
            .is_some_and(|t| t.same_table(&key));
        let failures = self.failures.clone();

        let def = self.tables.get_mut(&key).ok_or_else(|| missing_table(table))?;
        if def.is_identity(&layout.id_column) && !override_on {
            return Err(ResequenceError::Schema(format!(
                "Cannot insert explicit value for identity column in table '{}' when IDENTITY_INSERT is set to OFF",
                key.name
            )));
        }
        let id_idx = def
            .column_index(&layout.id_column)
            .ok_or_else(|| missing_column(table, &layout.id_column))?;
        let other_idx = layout
            .other_columns
            .iter()
            .map(|c| def.column_index(c).ok_or_else(|| missing_column(table, c)))
            .collect::<Result<Vec<usize>>>()?;

        let mut inserted = 0u64;
        for (pos, (old, new)) in mapping.iter().enumerate() {
            if failures.contains(&FailurePoint::InsertRow(pos)) {
                return Err(ResequenceError::Schema(format!(
                    "Violation of UNIQUE KEY constraint on {}: cannot insert row for identifier {}",
                    key, new
                )));
            }
            let values = captured.get(&old).ok_or_else(|| {
                ResequenceError::Schema(format!("no captured row for identifier {} in {}", old, key))
            })?;
            if def.contains_int(id_idx, new) {
                return Err(ResequenceError::Schema(format!(
                    "Violation of PRIMARY KEY constraint on {}: duplicate key {}",
                    key, new
                )));
            }

            let mut row = vec![Value::Null; def.columns.len()];
            row[id_idx] = Value::Int(new);
            for (value, &idx) in values.iter().zip(&other_idx) {
                row[idx] = value.clone();
            }
            def.rows.push(row);
            if def.identity.is_some() && new >= def.next_identity {
                def.next_identity = new.saturating_add(1);
            }
            inserted += 1;
        }

        self.record(format!("insert {}", key));
        Ok(inserted)
    }

    async fn reseed_identity(&mut self, table: &TableRef, value: i64) -> Result<()> {
        let key = self.key(table)?;
        let def = self.tables.get_mut(&key).ok_or_else(|| missing_table(table))?;
        if def.identity.is_none() {
            return Err(ResequenceError::Schema(format!(
                "Table '{}' does not contain an identity column",
                key
            )));
        }
        def.next_identity = value.saturating_add(1);
        self.record(format!("reseed {} {}", key, value));
        Ok(())
    }

    async fn set_explicit_ids(&mut self, table: &TableRef, enabled: bool) -> Result<()> {
        let key = self.key(table)?;
        if self.table(&key).is_some_and(|t| t.identity.is_none()) {
            return Err(ResequenceError::Schema(format!(
                "Table '{}' does not have the identity property",
                key
            )));
        }

        if enabled {
            if let Some(other) = self.explicit_ids.as_ref().filter(|t| !t.same_table(&key)) {
                return Err(ResequenceError::Schema(format!(
                    "IDENTITY_INSERT is already ON for table '{}'",
                    other
                )));
            }
            self.explicit_ids = Some(key.clone());
            self.explicit_id_engagements += 1;
            self.record(format!("explicit_ids on {}", key));
        } else {
            if self.take_failure(FailurePoint::ReleaseExplicitIds) {
                return Err(ResequenceError::Transaction(format!(
                    "connection reset while turning IDENTITY_INSERT off for '{}'",
                    key
                )));
            }
            if self.explicit_ids.as_ref().is_some_and(|t| t.same_table(&key)) {
                self.explicit_ids = None;
            }
            self.record(format!("explicit_ids off {}", key));
        }
        Ok(())
    }

    async fn clear_explicit_ids(&mut self) -> Result<()> {
        if let Some(table) = self.explicit_ids.take() {
            self.record(format!("explicit_ids off {}", table));
        }
        Ok(())
    }

    fn explicit_ids_engaged(&self) -> Option<&TableRef> {
        self.explicit_ids.as_ref()
    }
}
