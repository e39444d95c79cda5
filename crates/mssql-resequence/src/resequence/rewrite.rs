//! Rewrites dependent foreign key columns through the identifier mapping.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::mapping::IdentifierMapping;
use crate::core::schema::DependentReference;
use crate::core::traits::{ColumnRewrite, ResequenceStore};
use crate::error::Result;

/// Rows rewritten for one dependent reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentOutcome {
    /// `schema.table.column` of the dependent reference.
    pub reference: String,
    /// Rows whose value was replaced.
    pub rows_rewritten: u64,
    /// Non-NULL values that matched no parent row before the rewrite.
    pub unmapped_rows: u64,
}

/// Replace every mapped value in `dependent` with its new identifier.
///
/// Values with no entry in the mapping (NULL, or orphans that matched no
/// parent row to begin with) stay as they are. Orphans are logged and
/// counted; revalidation only catches the ones that match no new identifier.
pub async fn rewrite_references<S>(
    store: &mut S,
    dependent: &DependentReference,
    mapping: &IdentifierMapping,
) -> Result<ColumnRewrite>
where
    S: ResequenceStore + ?Sized,
{
    let counts = store
        .rewrite_column(&dependent.table, &dependent.column, mapping)
        .await?;
    debug!("Rewrote {} rows in {}", counts.rewritten, dependent);
    if counts.unmapped > 0 {
        warn!(
            "{} rows in {} hold values with no parent row; left unchanged",
            counts.unmapped, dependent
        );
    }
    Ok(counts)
}

/// Rewrite every dependent reference in caller order.
///
/// A pair listed twice is rewritten once; a second pass would remap values
/// that were already remapped.
pub async fn rewrite_all<S>(
    store: &mut S,
    dependents: &[DependentReference],
    mapping: &IdentifierMapping,
) -> Result<Vec<DependentOutcome>>
where
    S: ResequenceStore + ?Sized,
{
    let mut done: Vec<&DependentReference> = Vec::with_capacity(dependents.len());
    let mut outcomes = Vec::with_capacity(dependents.len());

    for dep in dependents {
        if done.iter().any(|d| d.same_target(dep)) {
            debug!("Skipping duplicate dependent reference {}", dep);
            continue;
        }
        let counts = rewrite_references(store, dep, mapping).await?;
        outcomes.push(DependentOutcome {
            reference: dep.to_string(),
            rows_rewritten: counts.rewritten,
            unmapped_rows: counts.unmapped,
        });
        done.push(dep);
    }

    Ok(outcomes)
}
