//! Suspends and later revalidates referential integrity on dependent tables.

use tracing::debug;

use crate::core::schema::{DependentReference, TableRef};
use crate::core::traits::ResequenceStore;
use crate::error::Result;

/// Tracks which dependent tables had their constraints suspended.
///
/// Tables are restored in the order they were suspended. A table that
/// appears under several dependent references is suspended once.
#[derive(Debug, Default)]
pub struct IntegrityGate {
    suspended: Vec<TableRef>,
}

impl IntegrityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop enforcing constraints on `table`.
    pub async fn suspend<S>(&mut self, store: &mut S, table: &TableRef) -> Result<()>
    where
        S: ResequenceStore + ?Sized,
    {
        if self.suspended.iter().any(|t| t.same_table(table)) {
            return Ok(());
        }
        store.suspend_constraints(table).await?;
        debug!("Suspended constraints on {}", table);
        self.suspended.push(table.clone());
        Ok(())
    }

    /// Suspend every dependent table, in caller order.
    pub async fn suspend_all<S>(&mut self, store: &mut S, dependents: &[DependentReference]) -> Result<()>
    where
        S: ResequenceStore + ?Sized,
    {
        for dep in dependents {
            self.suspend(store, &dep.table).await?;
        }
        Ok(())
    }

    /// Re-enable constraints on `table` and check every existing row.
    pub async fn restore_and_validate<S>(&mut self, store: &mut S, table: &TableRef) -> Result<()>
    where
        S: ResequenceStore + ?Sized,
    {
        store.restore_constraints(table).await?;
        self.suspended.retain(|t| !t.same_table(table));
        debug!("Restored and validated constraints on {}", table);
        Ok(())
    }

    /// Restore every suspended table in suspension order.
    ///
    /// Stops at the first table whose data fails revalidation.
    pub async fn restore_all<S>(&mut self, store: &mut S) -> Result<()>
    where
        S: ResequenceStore + ?Sized,
    {
        let pending = self.suspended.clone();
        for table in &pending {
            self.restore_and_validate(store, table).await?;
        }
        Ok(())
    }
}
