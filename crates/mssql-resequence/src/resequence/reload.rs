//! Replaces the parent's rows with copies bearing the new identifiers.

use tracing::{debug, warn};

use crate::core::mapping::IdentifierMapping;
use crate::core::schema::{ParentLayout, TableRef};
use crate::core::traits::ResequenceStore;
use crate::error::{ResequenceError, Result};

/// What the reload did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Whether explicit identifier insertion had to be engaged.
    pub explicit_override: bool,
    /// Whether the identity seed was reset to the new maximum.
    pub reseeded: bool,
}

/// Proof that explicit identifier insertion is engaged for a table.
///
/// The override lives on the session, not in the transaction, so it has to
/// be released explicitly whatever happens to the insert.
#[must_use = "the explicit-value override stays engaged until released"]
#[derive(Debug)]
pub struct ExplicitIdOverride {
    table: TableRef,
}

impl ExplicitIdOverride {
    /// Turn on explicit identifier insertion for `table`.
    pub async fn acquire<S>(store: &mut S, table: &TableRef) -> Result<Self>
    where
        S: ResequenceStore + ?Sized,
    {
        store.set_explicit_ids(table, true).await?;
        debug!("Explicit identifier insertion ON for {}", table);
        Ok(Self {
            table: table.clone(),
        })
    }

    /// Turn it off again.
    pub async fn release<S>(self, store: &mut S) -> Result<()>
    where
        S: ResequenceStore + ?Sized,
    {
        store.set_explicit_ids(&self.table, false).await?;
        debug!("Explicit identifier insertion OFF for {}", self.table);
        Ok(())
    }
}

/// Capture, delete, and reinsert every row of `table` under `mapping`.
///
/// System-generated identifiers are inserted under [`ExplicitIdOverride`],
/// which is released on success and on failure. When `reseed` is set the
/// identity seed is moved to the new maximum afterwards.
pub async fn reload_with_new_ids<S>(
    store: &mut S,
    table: &TableRef,
    layout: &ParentLayout,
    mapping: &IdentifierMapping,
    reseed: bool,
) -> Result<ReloadOutcome>
where
    S: ResequenceStore + ?Sized,
{
    let captured = store.capture_rows(table, layout).await?;
    if captured != mapping.len() as u64 {
        return Err(ResequenceError::Schema(format!(
            "{} changed during resequencing: mapped {} rows, captured {}",
            table,
            mapping.len(),
            captured
        )));
    }

    let deleted = store.delete_rows(table).await?;
    debug!("Deleted {} rows from {}", deleted, table);

    let explicit_override = layout.generation.is_system_generated();
    let inserted = if explicit_override {
        let guard = ExplicitIdOverride::acquire(store, table).await?;
        let inserted = store.insert_remapped(table, layout, mapping).await;
        let released = guard.release(store).await;
        match (inserted, released) {
            (Ok(rows), Ok(())) => rows,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(release_err)) => {
                warn!(
                    "Failed to release explicit identifier insertion on {}: {}",
                    table, release_err
                );
                return Err(e);
            }
        }
    } else {
        store.insert_remapped(table, layout, mapping).await?
    };

    if inserted != mapping.len() as u64 {
        return Err(ResequenceError::Schema(format!(
            "{}: expected to reinsert {} rows, inserted {}",
            table,
            mapping.len(),
            inserted
        )));
    }

    let reseeded = explicit_override && reseed && !mapping.is_empty();
    if reseeded {
        store.reseed_identity(table, mapping.len() as i64).await?;
        debug!("Reseeded identity of {} to {}", table, mapping.len());
    }

    Ok(ReloadOutcome {
        explicit_override,
        reseeded,
    })
}
