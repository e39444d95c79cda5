//! Builds the identifier mapping from the table's current contents.

use tracing::debug;

use crate::core::mapping::IdentifierMapping;
use crate::core::schema::TableRef;
use crate::core::traits::ResequenceStore;
use crate::error::{ResequenceError, Result};

/// Read the identifier column in ascending order and number it from 1.
///
/// Runs inside the caller's transaction so the mapping describes the same
/// rows the reload later replaces.
pub async fn build_mapping<S>(store: &mut S, table: &TableRef, id_column: &str) -> Result<IdentifierMapping>
where
    S: ResequenceStore + ?Sized,
{
    let ids = store.read_identifiers(table, id_column).await?;
    let mapping = IdentifierMapping::from_ascending(ids).map_err(|e| match e {
        ResequenceError::Schema(msg) => {
            ResequenceError::Schema(format!("{} in {}.{}", msg, table, id_column))
        }
        other => other,
    })?;

    debug!(
        "Built mapping for {}: {} rows, {} identifiers move",
        table,
        mapping.len(),
        mapping.moved()
    );
    Ok(mapping)
}
