//! Column metadata and identity detection for the parent table.

use tracing::debug;

use crate::core::schema::{GenerationMode, ParentLayout, TableRef};
use crate::core::traits::ResequenceStore;
use crate::error::{ResequenceError, Result};

/// Columns of `table` in definition order.
///
/// A table with no visible columns either does not exist or is not readable
/// by this login; both are schema errors.
pub async fn list_columns<S>(store: &mut S, table: &TableRef) -> Result<Vec<String>>
where
    S: ResequenceStore + ?Sized,
{
    let columns = store.list_columns(table).await?;
    if columns.is_empty() {
        return Err(ResequenceError::Schema(format!(
            "table {} does not exist or is not accessible",
            table
        )));
    }
    Ok(columns)
}

/// Whether the store assigns `column` values on insert.
pub async fn is_system_generated<S>(store: &mut S, table: &TableRef, column: &str) -> Result<bool>
where
    S: ResequenceStore + ?Sized,
{
    store.is_system_generated(table, column).await
}

/// Resolve the parent's column layout and identifier generation mode.
pub async fn resolve_layout<S>(store: &mut S, table: &TableRef, id_column: &str) -> Result<ParentLayout>
where
    S: ResequenceStore + ?Sized,
{
    let columns = list_columns(store, table).await?;
    let mut layout = ParentLayout::resolve(columns, id_column, GenerationMode::CallerAssigned)
        .ok_or_else(|| {
            ResequenceError::Schema(format!(
                "column {} not found in table {}",
                id_column, table
            ))
        })?;

    layout.generation =
        GenerationMode::from_identity(is_system_generated(store, table, &layout.id_column).await?);
    debug!(
        "Layout of {}: {} columns, id column {} ({:?})",
        table,
        layout.columns.len(),
        layout.id_column,
        layout.generation
    );
    Ok(layout)
}
