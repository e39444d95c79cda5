//! Old identifier → new identifier bijection.

use crate::error::{ResequenceError, Result};

/// Ordered, strictly monotonic mapping from existing identifiers to `1..=N`.
///
/// Entries are kept sorted by old value, and the new value of the entry at
/// index `i` is always `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMapping {
    old_ids: Vec<i64>,
}

impl IdentifierMapping {
    /// Build a mapping from identifiers already sorted ascending.
    ///
    /// Fails when a value repeats or the input is out of order, since either
    /// would break the bijection.
    pub fn from_ascending<I>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut old_ids: Vec<i64> = Vec::new();
        for id in ids {
            if let Some(&prev) = old_ids.last() {
                if id == prev {
                    return Err(ResequenceError::Schema(format!(
                        "duplicate identifier value {}",
                        id
                    )));
                }
                if id < prev {
                    return Err(ResequenceError::Schema(format!(
                        "identifier values not in ascending order ({} after {})",
                        id, prev
                    )));
                }
            }
            old_ids.push(id);
        }
        Ok(Self { old_ids })
    }

    /// Build a mapping from identifiers in any order.
    pub fn from_unordered<I>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        Self::from_ascending(ids)
    }

    pub fn len(&self) -> usize {
        self.old_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old_ids.is_empty()
    }

    /// New identifier for `old`, if it exists in the table.
    pub fn get(&self, old: i64) -> Option<i64> {
        self.old_ids
            .binary_search(&old)
            .ok()
            .map(|idx| idx as i64 + 1)
    }

    /// `(old, new)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.old_ids
            .iter()
            .enumerate()
            .map(|(idx, &old)| (old, idx as i64 + 1))
    }

    /// Largest existing identifier before renumbering.
    pub fn max_old(&self) -> Option<i64> {
        self.old_ids.last().copied()
    }

    /// Number of identifiers whose value changes.
    pub fn moved(&self) -> usize {
        self.iter().filter(|(old, new)| old != new).count()
    }

    /// True when the table is already contiguous from 1.
    pub fn is_identity(&self) -> bool {
        self.moved() == 0
    }
}
