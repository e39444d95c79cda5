//! Resequencing orchestrator - runs every step inside one transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::integrity::IntegrityGate;
use super::mapping::build_mapping;
use super::rewrite::DependentOutcome;
use super::{introspect, reload, rewrite};
use crate::core::identifier::validate_identifier;
use crate::core::schema::{DependentReference, GenerationMode, TableRef, DEFAULT_SCHEMA};
use crate::core::traits::ResequenceStore;
use crate::error::{ResequenceError, Result};

/// Progress of one resequencing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResequenceState {
    Idle,
    MappingBuilt,
    DependentsSuspended,
    ReferencesRewritten,
    ParentReloaded,
    DependentsValidated,
    Committed,
    RolledBack,
}

impl ResequenceState {
    /// Committed and RolledBack end the operation.
    pub fn is_terminal(self) -> bool {
        matches!(self, ResequenceState::Committed | ResequenceState::RolledBack)
    }
}

impl fmt::Display for ResequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResequenceState::Idle => "idle",
            ResequenceState::MappingBuilt => "mapping_built",
            ResequenceState::DependentsSuspended => "dependents_suspended",
            ResequenceState::ReferencesRewritten => "references_rewritten",
            ResequenceState::ParentReloaded => "parent_reloaded",
            ResequenceState::DependentsValidated => "dependents_validated",
            ResequenceState::Committed => "committed",
            ResequenceState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// What to resequence.
#[derive(Debug, Clone)]
pub struct ResequenceRequest {
    /// Parent table.
    pub table: TableRef,
    /// Identifier column of the parent table.
    pub id_column: String,
    /// Dependent foreign key columns, in the order they are processed.
    pub dependents: Vec<DependentReference>,
    /// Reset the identity seed to the new maximum after reload (default: true).
    pub reseed_identity: bool,
    /// Build the mapping, report it, and roll back.
    pub dry_run: bool,
}

impl ResequenceRequest {
    /// Request for `table` (`name` or `schema.name`) keyed by `id_column`.
    pub fn new(table: &str, id_column: &str) -> Self {
        Self::in_schema(table, id_column, DEFAULT_SCHEMA)
    }

    /// Like [`new`](Self::new), resolving unqualified names in `default_schema`.
    pub fn in_schema(table: &str, id_column: &str, default_schema: &str) -> Self {
        Self {
            table: TableRef::parse(table, default_schema),
            id_column: id_column.trim().to_string(),
            dependents: Vec::new(),
            reseed_identity: true,
            dry_run: false,
        }
    }

    /// Add dependents from `Table.Column` strings, skipping malformed entries.
    pub fn with_dependents<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let schema = self.table.schema.clone();
        self.dependents
            .extend(DependentReference::parse_all(entries, &schema));
        self
    }

    /// Add already-parsed dependents.
    pub fn with_dependent_refs(mut self, refs: impl IntoIterator<Item = DependentReference>) -> Self {
        self.dependents.extend(refs);
        self
    }

    pub fn with_reseed_identity(mut self, reseed: bool) -> Self {
        self.reseed_identity = reseed;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check arguments before anything touches the store.
    pub fn validate(&self, target: &str) -> Result<()> {
        if target.trim().is_empty() {
            return Err(ResequenceError::Validation(
                "connection target is required".into(),
            ));
        }
        if self.table.name.trim().is_empty() {
            return Err(ResequenceError::Validation("table name is required".into()));
        }
        if self.id_column.trim().is_empty() {
            return Err(ResequenceError::Validation(
                "identifier column is required".into(),
            ));
        }
        validate_identifier(&self.table.schema)?;
        validate_identifier(&self.table.name)?;
        validate_identifier(&self.id_column)?;
        for dep in &self.dependents {
            validate_identifier(&dep.table.schema)?;
            validate_identifier(&dep.table.name)?;
            validate_identifier(&dep.column)?;
        }
        Ok(())
    }
}

/// Outcome of a resequencing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResequenceReport {
    /// Parent table (`schema.table`).
    pub table: String,

    /// Identifier column as spelled in the request.
    pub id_column: String,

    /// Rows in the parent table.
    pub rows: u64,

    /// Identifiers whose value changed.
    pub ids_moved: u64,

    /// Largest identifier before renumbering.
    pub max_id_before: Option<i64>,

    /// Per-dependent rewrite counts.
    pub dependents: Vec<DependentOutcome>,

    /// Identifier generation mode, once detected.
    pub generation: Option<GenerationMode>,

    /// Whether explicit identifier insertion was engaged.
    pub explicit_override: bool,

    /// Whether the identity seed was reset.
    pub reseeded: bool,

    /// Whether this was a dry run.
    pub dry_run: bool,

    /// Final state.
    pub state: ResequenceState,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl ResequenceReport {
    fn new(request: &ResequenceRequest) -> Self {
        Self {
            table: request.table.to_string(),
            id_column: request.id_column.clone(),
            rows: 0,
            ids_moved: 0,
            max_id_before: None,
            dependents: Vec::new(),
            generation: None,
            explicit_override: false,
            reseeded: false,
            dry_run: request.dry_run,
            state: ResequenceState::Idle,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total dependent rows rewritten.
    pub fn dependent_rows(&self) -> u64 {
        self.dependents.iter().map(|d| d.rows_rewritten).sum()
    }

    /// Total dependent rows left pointing at no original parent row.
    pub fn unmapped_rows(&self) -> u64 {
        self.dependents.iter().map(|d| d.unmapped_rows).sum()
    }
}

/// Drives one resequencing operation against a store.
///
/// The store's session is used exclusively for the whole operation; the
/// caller serializes resequencing of the same table.
pub struct ResequenceOrchestrator<'a, S: ResequenceStore + ?Sized> {
    store: &'a mut S,
    state: ResequenceState,
}

impl<'a, S: ResequenceStore + ?Sized> ResequenceOrchestrator<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self {
            store,
            state: ResequenceState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> ResequenceState {
        self.state
    }

    /// Run the operation.
    ///
    /// Returns the report on commit (or on a dry run's rollback). Any error
    /// after the transaction opens rolls back, clears the explicit-value
    /// override, and is returned unchanged.
    pub async fn run(&mut self, request: &ResequenceRequest) -> Result<ResequenceReport> {
        request.validate(&self.store.target())?;

        let started = Instant::now();
        let mut report = ResequenceReport::new(request);
        self.state = ResequenceState::Idle;

        info!(
            "Resequencing {}.{} on {} ({} dependents)",
            request.table,
            request.id_column,
            self.store.target(),
            request.dependents.len()
        );

        self.store.begin().await?;

        match self.execute(request, &mut report).await {
            Ok(()) => {
                self.release_staging().await;
                report.state = self.state;
                report.duration_ms = started.elapsed().as_millis() as u64;
                if self.state == ResequenceState::Committed {
                    info!(
                        "Resequenced {}: {} rows, {} ids moved, {} dependent rows rewritten in {}ms",
                        request.table,
                        report.rows,
                        report.ids_moved,
                        report.dependent_rows(),
                        report.duration_ms
                    );
                }
                Ok(report)
            }
            Err(e) => {
                self.abort(request, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(&mut self, request: &ResequenceRequest, report: &mut ResequenceReport) -> Result<()> {
        // Idle -> MappingBuilt
        let mapping = build_mapping(&mut *self.store, &request.table, &request.id_column).await?;
        self.store
            .stage_mapping(&request.table, &request.id_column, &mapping)
            .await?;
        report.rows = mapping.len() as u64;
        report.ids_moved = mapping.moved() as u64;
        report.max_id_before = mapping.max_old();
        if mapping.is_identity() {
            debug!("{} is already numbered 1..{}", request.table, mapping.len());
        }
        self.transition(ResequenceState::MappingBuilt);

        if request.dry_run {
            self.store.rollback().await?;
            self.transition(ResequenceState::RolledBack);
            info!(
                "Dry run for {}: {} rows, {} ids would move (max id {:?} -> {})",
                request.table,
                report.rows,
                report.ids_moved,
                report.max_id_before,
                report.rows
            );
            return Ok(());
        }

        // MappingBuilt -> DependentsSuspended
        let mut gate = IntegrityGate::new();
        gate.suspend_all(&mut *self.store, &request.dependents).await?;
        self.transition(ResequenceState::DependentsSuspended);

        // DependentsSuspended -> ReferencesRewritten
        report.dependents = rewrite::rewrite_all(&mut *self.store, &request.dependents, &mapping).await?;
        self.transition(ResequenceState::ReferencesRewritten);

        // ReferencesRewritten -> ParentReloaded
        let layout = introspect::resolve_layout(&mut *self.store, &request.table, &request.id_column).await?;
        report.generation = Some(layout.generation);
        let outcome = reload::reload_with_new_ids(
            &mut *self.store,
            &request.table,
            &layout,
            &mapping,
            request.reseed_identity,
        )
        .await?;
        report.explicit_override = outcome.explicit_override;
        report.reseeded = outcome.reseeded;
        self.transition(ResequenceState::ParentReloaded);

        // ParentReloaded -> DependentsValidated
        gate.restore_all(&mut *self.store).await?;
        self.transition(ResequenceState::DependentsValidated);

        // DependentsValidated -> Committed
        self.store.commit().await?;
        self.transition(ResequenceState::Committed);
        Ok(())
    }

    fn transition(&mut self, next: ResequenceState) {
        debug!("Resequence state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Roll back and clear session state. Cleanup failures are logged; the
    /// caller returns the original error.
    async fn abort(&mut self, request: &ResequenceRequest, error: &ResequenceError) {
        warn!(
            "Resequencing {} failed in state {}: {}. Rolling back.",
            request.table, self.state, error
        );
        if let Err(e) = self.store.rollback().await {
            warn!("Rollback failed for {}: {}", request.table, e);
        }
        if let Err(e) = self.store.clear_explicit_ids().await {
            warn!(
                "Failed to clear explicit identifier insertion after rollback: {}",
                e
            );
        }
        self.release_staging().await;
        self.state = ResequenceState::RolledBack;
    }

    async fn release_staging(&mut self) {
        if let Err(e) = self.store.release_staging().await {
            warn!("Failed to drop resequencing staging objects: {}", e);
        }
    }
}

/// Resequence `table.id_column` and rewrite each `Table.Column` dependent.
///
/// Malformed dependent entries are skipped. On success the caller is expected
/// to publish a data-changed notification for `table`.
pub async fn resequence_table<S, D>(
    store: &mut S,
    table: &str,
    id_column: &str,
    dependents: &[D],
) -> Result<ResequenceReport>
where
    S: ResequenceStore + ?Sized,
    D: AsRef<str>,
{
    let request = ResequenceRequest::new(table, id_column).with_dependents(dependents);
    ResequenceOrchestrator::new(store).run(&request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_table_and_dependents() {
        let request = ResequenceRequest::new("sales.tbProduct", " pid ")
            .with_dependents(["tbOrder.pid", "broken", "inv.tbStock.pid"]);
        assert_eq!(request.table, TableRef::new("sales", "tbProduct"));
        assert_eq!(request.id_column, "pid");
        assert_eq!(request.dependents.len(), 2);
        // Two-part dependents inherit the parent's schema.
        assert_eq!(request.dependents[0].table.schema, "sales");
        assert_eq!(request.dependents[1].table.schema, "inv");
    }

    #[test]
    fn test_in_schema_qualifies_bare_names() {
        let request = ResequenceRequest::in_schema("tbProduct", "pid", "inventory");
        assert_eq!(request.table, TableRef::new("inventory", "tbProduct"));
        let request = ResequenceRequest::in_schema("dbo.tbProduct", "pid", "inventory");
        assert_eq!(request.table, TableRef::new("dbo", "tbProduct"));
    }

    #[test]
    fn test_validate_rejects_missing_arguments() {
        let ok = ResequenceRequest::new("tbProduct", "pid");
        assert!(ok.validate("localhost:1433/inventory").is_ok());
        assert!(matches!(
            ok.validate("  "),
            Err(ResequenceError::Validation(_))
        ));
        assert!(matches!(
            ResequenceRequest::new("", "pid").validate("memory"),
            Err(ResequenceError::Validation(_))
        ));
        assert!(matches!(
            ResequenceRequest::new("tbProduct", "").validate("memory"),
            Err(ResequenceError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_null_byte_in_dependent() {
        let request = ResequenceRequest::new("tbProduct", "pid").with_dependents(["tbOrder.p\0id"]);
        assert!(matches!(
            request.validate("memory"),
            Err(ResequenceError::Validation(_))
        ));
    }

    #[test]
    fn test_state_display_and_terminal() {
        assert_eq!(ResequenceState::MappingBuilt.to_string(), "mapping_built");
        assert!(ResequenceState::Committed.is_terminal());
        assert!(ResequenceState::RolledBack.is_terminal());
        assert!(!ResequenceState::ParentReloaded.is_terminal());
    }

    #[test]
    fn test_report_json_uses_snake_case_state() {
        let request = ResequenceRequest::new("tbProduct", "pid");
        let report = ResequenceReport::new(&request);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"state\": \"idle\""));
        assert!(json.contains("\"table\": \"dbo.tbProduct\""));
    }
}
