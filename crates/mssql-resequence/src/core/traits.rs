//! Storage capabilities the resequencing engine drives.
//!
//! [`ResequenceStore`] is the seam between the resequencing algorithm and a
//! concrete database. One store value wraps exactly one connection/session:
//! every method runs on that session, inside the transaction opened by
//! [`ResequenceStore::begin`].
//!
//! # Capabilities
//!
//! - **Transaction control**: begin, commit, rollback
//! - **Schema metadata**: column listing, identity detection
//! - **Identifiers**: ascending read of the identifier column, mapping staging
//! - **Constraint suspension**: stop enforcing a table's constraints, later
//!   re-enable them and report any row that now violates one
//! - **Row reload**: capture, delete, reinsert under new identifiers
//! - **Session override**: explicit values for a system-generated column
//!
//! The explicit-value override is session state. Implementations must not
//! assume that [`ResequenceStore::rollback`] clears it.

use async_trait::async_trait;

use crate::error::Result;

use super::mapping::IdentifierMapping;
use super::schema::{ParentLayout, TableRef};

/// Row counts from one dependent column rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnRewrite {
    /// Rows whose value had an entry in the mapping.
    pub rewritten: u64,
    /// Non-NULL values with no entry in the mapping, left as they were.
    pub unmapped: u64,
}

#[async_trait]
pub trait ResequenceStore: Send {
    // ===== Session =====

    /// Human-readable connection target (e.g. `host:1433/inventory`).
    fn target(&self) -> String;

    // ===== Transaction Control =====

    /// Open the transaction every later call runs in.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction. A no-op when none is open.
    async fn rollback(&mut self) -> Result<()>;

    // ===== Schema Metadata =====

    /// Columns of `table` in definition order. Empty when the table does not exist.
    async fn list_columns(&mut self, table: &TableRef) -> Result<Vec<String>>;

    /// Whether `column` is assigned by the store on insert.
    ///
    /// Must fail rather than guess when the metadata is inconclusive.
    async fn is_system_generated(&mut self, table: &TableRef, column: &str) -> Result<bool>;

    // ===== Identifiers =====

    /// Every identifier value in ascending order, duplicates included.
    async fn read_identifiers(&mut self, table: &TableRef, id_column: &str) -> Result<Vec<i64>>;

    /// Make `mapping` available to later server-side statements.
    ///
    /// Stores may rebuild it from `table.id_column` instead of shipping the
    /// pairs, as long as the staged mapping equals `mapping`.
    async fn stage_mapping(
        &mut self,
        _table: &TableRef,
        _id_column: &str,
        _mapping: &IdentifierMapping,
    ) -> Result<()> {
        Ok(())
    }

    /// Drop anything staged for this operation. Called after commit or rollback.
    async fn release_staging(&mut self) -> Result<()> {
        Ok(())
    }

    // ===== Constraint Suspension =====

    /// Stop enforcing every constraint declared on `table`.
    async fn suspend_constraints(&mut self, table: &TableRef) -> Result<()>;

    /// Re-enable and revalidate every constraint declared on `table`.
    ///
    /// Fails with `ConstraintViolation` when existing rows break a constraint.
    async fn restore_constraints(&mut self, table: &TableRef) -> Result<()>;

    // ===== Reference Rewrite =====

    /// Replace each mapped value of `table.column` with its new identifier.
    ///
    /// Unmapped values, NULL included, are left untouched; non-NULL ones are
    /// counted in [`ColumnRewrite::unmapped`].
    async fn rewrite_column(
        &mut self,
        table: &TableRef,
        column: &str,
        mapping: &IdentifierMapping,
    ) -> Result<ColumnRewrite>;

    // ===== Row Reload =====

    /// Snapshot every row of `table` keyed by its current identifier.
    async fn capture_rows(&mut self, table: &TableRef, layout: &ParentLayout) -> Result<u64>;

    /// Remove every row of `table`.
    async fn delete_rows(&mut self, table: &TableRef) -> Result<u64>;

    /// Reinsert the captured rows under their new identifiers, ascending.
    async fn insert_remapped(
        &mut self,
        table: &TableRef,
        layout: &ParentLayout,
        mapping: &IdentifierMapping,
    ) -> Result<u64>;

    /// Make the next generated identifier `value + 1`.
    async fn reseed_identity(&mut self, table: &TableRef, value: i64) -> Result<()>;

    // ===== Session Override =====

    /// Turn explicit identifier insertion on or off for `table`.
    async fn set_explicit_ids(&mut self, table: &TableRef, enabled: bool) -> Result<()>;

    /// Turn off whatever explicit-value override is engaged on this session.
    async fn clear_explicit_ids(&mut self) -> Result<()>;

    /// Table the override is currently engaged for, if any.
    fn explicit_ids_engaged(&self) -> Option<&TableRef>;
}
