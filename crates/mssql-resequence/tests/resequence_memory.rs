//! End-to-end resequencing against the in-process store.
//!
//! Fixture: `tbProduct(pid IDENTITY, name)` with pids {5, 3, 9, 1},
//! `tbOrder(oid, pid)` and `tbReview(rid, product_id NULL)`, both with a
//! foreign key to `tbProduct.pid`.

use mssql_resequence::drivers::{FailurePoint, ForeignKey, MemoryStore, MemoryTable, Value};
use mssql_resequence::{
    resequence_table, GenerationMode, ResequenceError, ResequenceOrchestrator, ResequenceRequest,
    ResequenceState, ResequenceStore, TableRef,
};

fn products() -> TableRef {
    TableRef::new("dbo", "tbProduct")
}

fn orders() -> TableRef {
    TableRef::new("dbo", "tbOrder")
}

fn reviews() -> TableRef {
    TableRef::new("dbo", "tbReview")
}

fn fixture() -> MemoryStore {
    let mut store = MemoryStore::new("memory/inventory");
    store
        .create_table(
            products(),
            MemoryTable::new(["pid", "name"]).with_identity("pid"),
        )
        .create_table(orders(), MemoryTable::new(["oid", "pid", "qty"]).with_identity("oid"))
        .create_table(reviews(), MemoryTable::new(["rid", "product_id"]))
        .add_foreign_key(ForeignKey::new(orders(), "pid", products(), "pid"))
        .add_foreign_key(ForeignKey::new(reviews(), "product_id", products(), "pid"));

    for (pid, name) in [(5, "bolt"), (3, "nut"), (9, "washer"), (1, "screw")] {
        store
            .insert_row(&products(), [Value::from(pid), Value::from(name)])
            .unwrap();
    }
    for (oid, pid, qty) in [(1, 5, 2), (2, 9, 1), (3, 3, 4), (4, 5, 7)] {
        store
            .insert_row(&orders(), [Value::from(oid), Value::from(pid), Value::from(qty)])
            .unwrap();
    }
    store
        .insert_row(&reviews(), [Value::from(1), Value::from(1)])
        .unwrap();
    store
        .insert_row(&reviews(), [Value::from(2), Value::from(None::<i64>)])
        .unwrap();
    store
}

fn request() -> ResequenceRequest {
    ResequenceRequest::new("tbProduct", "pid").with_dependents(["tbOrder.pid", "tbReview.product_id"])
}

fn ints(store: &MemoryStore, table: &TableRef, column: &str) -> Vec<Option<i64>> {
    store
        .table(table)
        .unwrap()
        .column_values(column)
        .iter()
        .map(Value::as_int)
        .collect()
}

fn name_of(store: &MemoryStore, pid: i64) -> Option<Value> {
    let table = store.table(&products()).unwrap();
    let pid_idx = table.column_index("pid").unwrap();
    let name_idx = table.column_index("name").unwrap();
    table
        .rows()
        .iter()
        .find(|r| r[pid_idx].as_int() == Some(pid))
        .map(|r| r[name_idx].clone())
}

fn snapshot(store: &MemoryStore) -> Vec<MemoryTable> {
    [products(), orders(), reviews()]
        .iter()
        .map(|t| store.table(t).unwrap().clone())
        .collect()
}

#[tokio::test]
async fn test_identifiers_become_dense_in_original_order() {
    let mut store = fixture();
    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();

    let mut pids: Vec<i64> = ints(&store, &products(), "pid").into_iter().flatten().collect();
    pids.sort_unstable();
    assert_eq!(pids, vec![1, 2, 3, 4]);

    // 1 -> 1, 3 -> 2, 5 -> 3, 9 -> 4
    assert_eq!(name_of(&store, 1), Some(Value::from("screw")));
    assert_eq!(name_of(&store, 2), Some(Value::from("nut")));
    assert_eq!(name_of(&store, 3), Some(Value::from("bolt")));
    assert_eq!(name_of(&store, 4), Some(Value::from("washer")));

    assert_eq!(report.state, ResequenceState::Committed);
    assert_eq!(report.rows, 4);
    assert_eq!(report.ids_moved, 3);
    assert_eq!(report.max_id_before, Some(9));
    assert_eq!(report.generation, Some(GenerationMode::SystemGenerated));
}

#[tokio::test]
async fn test_dependents_follow_their_parent_rows() {
    let mut store = fixture();
    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();

    assert_eq!(
        ints(&store, &orders(), "pid"),
        vec![Some(3), Some(4), Some(2), Some(3)]
    );
    // NULL stays NULL.
    assert_eq!(ints(&store, &reviews(), "product_id"), vec![Some(1), None]);

    assert_eq!(report.dependents.len(), 2);
    assert_eq!(report.dependents[0].reference, "dbo.tbOrder.pid");
    assert_eq!(report.dependents[0].rows_rewritten, 4);
    assert_eq!(report.dependents[1].rows_rewritten, 1);
    assert_eq!(report.dependent_rows(), 5);
}

#[tokio::test]
async fn test_identity_seed_continues_after_new_maximum() {
    let mut store = fixture();
    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();

    assert!(report.explicit_override);
    assert!(report.reseeded);
    assert_eq!(store.table(&products()).unwrap().next_identity(), 5);
    assert_eq!(store.explicit_ids_engaged(), None);
    assert!(!store.in_transaction());
    assert!(!store.has_staged_mapping());
}

#[tokio::test]
async fn test_reseed_can_be_disabled() {
    let mut store = fixture();
    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request().with_reseed_identity(false))
        .await
        .unwrap();

    assert!(!report.reseeded);
    // Reinsertion with explicit values still pushed the seed past the old maximum of 4.
    assert_eq!(store.table(&products()).unwrap().next_identity(), 10);
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let mut store = fixture();
    ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();
    let after_first = snapshot(&store);

    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();

    assert_eq!(report.ids_moved, 0);
    assert_eq!(report.max_id_before, Some(4));
    assert_eq!(snapshot(&store), after_first);
}

#[tokio::test]
async fn test_unmapped_dependent_values_are_left_alone() {
    let mut store = fixture();
    let audit = TableRef::new("dbo", "tbAudit");
    store.create_table(audit.clone(), MemoryTable::new(["aid", "product_ref"]));
    for (aid, product_ref) in [(1, 9), (2, 42), (3, 3)] {
        store
            .insert_row(&audit, [Value::from(aid), Value::from(product_ref)])
            .unwrap();
    }

    let request = request().with_dependents(["tbAudit.product_ref"]);
    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request)
        .await
        .unwrap();

    assert_eq!(
        ints(&store, &audit, "product_ref"),
        vec![Some(4), Some(42), Some(2)]
    );
    assert_eq!(report.dependents[2].rows_rewritten, 2);
    assert_eq!(report.dependents[2].unmapped_rows, 1);
    // NULL is not an orphan.
    assert_eq!(report.dependents[1].unmapped_rows, 0);
}

#[tokio::test]
async fn test_orphan_matching_a_new_identifier_is_reported() {
    let mut store = fixture();
    // No product 2 exists, but 2 is one of the new identifiers.
    store
        .insert_row(&orders(), [Value::from(5), Value::from(2), Value::from(1)])
        .unwrap();

    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();

    assert_eq!(report.state, ResequenceState::Committed);
    assert_eq!(report.dependents[0].reference, "dbo.tbOrder.pid");
    assert_eq!(report.dependents[0].rows_rewritten, 4);
    assert_eq!(report.dependents[0].unmapped_rows, 1);
    assert_eq!(report.unmapped_rows(), 1);
    assert_eq!(
        ints(&store, &orders(), "pid"),
        vec![Some(3), Some(4), Some(2), Some(3), Some(2)]
    );
    assert!(report.to_json().unwrap().contains("\"unmapped_rows\": 1"));
}

#[tokio::test]
async fn test_failed_reinsert_rolls_everything_back() {
    let mut store = fixture();
    let before = snapshot(&store);
    store.fail_at(FailurePoint::InsertRow(2));

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, ResequenceError::Schema(_)));
    assert_eq!(snapshot(&store), before);
    assert_eq!(store.explicit_ids_engaged(), None);
    assert!(!store.in_transaction());
    assert!(!store.has_staged_mapping());
    assert!(store.operations().iter().any(|op| op == "rollback"));
    assert!(!store.operations().iter().any(|op| op == "commit"));
}

#[tokio::test]
async fn test_abort_clears_override_left_on_by_failed_release() {
    let mut store = fixture();
    let before = snapshot(&store);
    store
        .fail_at(FailurePoint::InsertRow(1))
        .fail_at(FailurePoint::ReleaseExplicitIds);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap_err();

    // The insert error wins over the failed release.
    match &err {
        ResequenceError::Schema(message) => assert!(message.contains("UNIQUE KEY")),
        other => panic!("expected schema error, got {:?}", other),
    }
    assert_eq!(snapshot(&store), before);
    assert_eq!(store.explicit_ids_engaged(), None);
    assert!(!store.in_transaction());

    let ops = store.operations();
    let rollback = ops.iter().position(|op| op == "rollback").unwrap();
    let cleared = ops
        .iter()
        .rposition(|op| op == "explicit_ids off dbo.tbProduct")
        .unwrap();
    assert!(rollback < cleared);
}

#[tokio::test]
async fn test_orchestrator_reports_rolled_back_state() {
    let mut store = fixture();
    store.fail_at(FailurePoint::Rewrite);

    let mut orchestrator = ResequenceOrchestrator::new(&mut store);
    let err = orchestrator.run(&request()).await.unwrap_err();

    assert!(matches!(err, ResequenceError::Transaction(_)));
    assert_eq!(orchestrator.state(), ResequenceState::RolledBack);
}

#[tokio::test]
async fn test_commit_failure_leaves_data_unchanged() {
    let mut store = fixture();
    let before = snapshot(&store);
    store.fail_at(FailurePoint::Commit);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), mssql_resequence::error::EXIT_TRANSACTION_ERROR);
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn test_suspend_failure_rolls_back() {
    let mut store = fixture();
    let before = snapshot(&store);
    store.fail_at(FailurePoint::SuspendConstraints);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, ResequenceError::Transaction(_)));
    assert_eq!(snapshot(&store), before);
    assert_eq!(store.explicit_id_engagements(), 0);
}

#[tokio::test]
async fn test_inconclusive_identity_metadata_is_schema_error() {
    let mut store = fixture();
    let before = snapshot(&store);
    store.fail_at(FailurePoint::IdentityMetadata);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, ResequenceError::Schema(_)));
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn test_caller_assigned_ids_never_engage_override() {
    let mut store = MemoryStore::default();
    let categories = TableRef::new("dbo", "tbCategory");
    let items = TableRef::new("dbo", "tbItem");
    store
        .create_table(categories.clone(), MemoryTable::new(["cid", "label"]))
        .create_table(items.clone(), MemoryTable::new(["iid", "cid"]))
        .add_foreign_key(ForeignKey::new(items.clone(), "cid", categories.clone(), "cid"));
    for (cid, label) in [(10, "a"), (20, "b"), (30, "c")] {
        store
            .insert_row(&categories, [Value::from(cid), Value::from(label)])
            .unwrap();
    }
    for (iid, cid) in [(1, 30), (2, 10)] {
        store.insert_row(&items, [Value::from(iid), Value::from(cid)]).unwrap();
    }

    let request = ResequenceRequest::new("tbCategory", "cid").with_dependents(["tbItem.cid"]);
    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request)
        .await
        .unwrap();

    assert_eq!(report.generation, Some(GenerationMode::CallerAssigned));
    assert!(!report.explicit_override);
    assert!(!report.reseeded);
    assert_eq!(store.explicit_id_engagements(), 0);
    assert!(!store.operations().iter().any(|op| op.starts_with("explicit_ids")));
    assert_eq!(ints(&store, &items, "cid"), vec![Some(3), Some(1)]);
}

#[tokio::test]
async fn test_orphaned_dependent_fails_revalidation() {
    let mut store = fixture();
    store
        .insert_row(&orders(), [Value::from(5), Value::from(77), Value::from(1)])
        .unwrap();
    let before = snapshot(&store);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap_err();

    match &err {
        ResequenceError::ConstraintViolation { table, message } => {
            assert_eq!(table, "dbo.tbOrder");
            assert!(message.contains("77"));
        }
        other => panic!("expected constraint violation, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 4);
    assert_eq!(snapshot(&store), before);
    assert!(store.table(&orders()).unwrap().constraints_enabled());
}

#[tokio::test]
async fn test_unlisted_dependent_blocks_parent_delete() {
    let mut store = fixture();
    let before = snapshot(&store);
    let request = ResequenceRequest::new("tbProduct", "pid").with_dependents(["tbOrder.pid"]);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request)
        .await
        .unwrap_err();

    assert!(matches!(err, ResequenceError::ConstraintViolation { .. }));
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn test_invalid_request_touches_nothing() {
    let mut store = fixture();
    let before = snapshot(&store);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&ResequenceRequest::new("tbProduct", " "))
        .await
        .unwrap_err();

    assert!(matches!(err, ResequenceError::Validation(_)));
    assert!(store.operations().is_empty());
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn test_missing_table_and_column_are_schema_errors() {
    let mut store = fixture();

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&ResequenceRequest::new("tbMissing", "id"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResequenceError::Schema(_)));

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&ResequenceRequest::new("tbProduct", "product_id"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResequenceError::Schema(_)));
    assert!(!store.in_transaction());
}

#[tokio::test]
async fn test_missing_dependent_table_rolls_back() {
    let mut store = fixture();
    let before = snapshot(&store);
    let request = request().with_dependents(["tbGone.pid"]);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request)
        .await
        .unwrap_err();

    assert!(matches!(err, ResequenceError::Schema(_)));
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn test_duplicate_identifiers_are_rejected() {
    let mut store = fixture();
    store
        .insert_row(&products(), [Value::from(3), Value::from("nut again")])
        .unwrap();
    let before = snapshot(&store);

    let err = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, ResequenceError::Schema(ref m) if m.contains("duplicate")));
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn test_empty_parent_commits_without_reseed() {
    let mut store = fixture();
    for pid in [5, 3, 9, 1] {
        store.delete_where(&products(), "pid", pid).unwrap();
    }
    for oid in [1, 2, 3, 4] {
        store.delete_where(&orders(), "oid", oid).unwrap();
    }
    store.delete_where(&reviews(), "rid", 1).unwrap();

    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();

    assert_eq!(report.state, ResequenceState::Committed);
    assert_eq!(report.rows, 0);
    assert_eq!(report.max_id_before, None);
    assert!(!report.reseeded);
}

#[tokio::test]
async fn test_dry_run_reports_and_rolls_back() {
    let mut store = fixture();
    let before = snapshot(&store);

    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request().with_dry_run(true))
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.state, ResequenceState::RolledBack);
    assert_eq!(report.rows, 4);
    assert_eq!(report.ids_moved, 3);
    assert!(report.dependents.is_empty());
    assert_eq!(snapshot(&store), before);
    assert!(!store.operations().iter().any(|op| op.starts_with("delete")));
    assert!(!store.has_staged_mapping());
}

#[tokio::test]
async fn test_duplicate_dependents_are_rewritten_once() {
    let mut store = fixture();
    let request = request().with_dependents(["dbo.tbOrder.PID"]);

    let report = ResequenceOrchestrator::new(&mut store)
        .run(&request)
        .await
        .unwrap();

    // Rewriting twice would map 5 -> 3 -> 2.
    assert_eq!(
        ints(&store, &orders(), "pid"),
        vec![Some(3), Some(4), Some(2), Some(3)]
    );
    assert_eq!(report.dependents.len(), 2);
    let suspends = store
        .operations()
        .iter()
        .filter(|op| *op == "suspend dbo.tbOrder")
        .count();
    assert_eq!(suspends, 1);
}

#[tokio::test]
async fn test_operations_run_in_protocol_order() {
    let mut store = fixture();
    ResequenceOrchestrator::new(&mut store)
        .run(&request())
        .await
        .unwrap();

    let ops = store.operations();
    let pos = |name: &str| {
        ops.iter()
            .position(|op| op == name)
            .unwrap_or_else(|| panic!("missing operation {name}: {ops:?}"))
    };

    assert_eq!(ops.first().map(String::as_str), Some("begin"));
    assert_eq!(ops.last().map(String::as_str), Some("commit"));
    assert!(pos("suspend dbo.tbOrder") < pos("rewrite dbo.tbOrder.pid"));
    assert!(pos("suspend dbo.tbReview") < pos("rewrite dbo.tbOrder.pid"));
    assert!(pos("rewrite dbo.tbReview.product_id") < pos("capture dbo.tbProduct"));
    assert!(pos("capture dbo.tbProduct") < pos("delete dbo.tbProduct"));
    assert!(pos("delete dbo.tbProduct") < pos("explicit_ids on dbo.tbProduct"));
    assert!(pos("explicit_ids on dbo.tbProduct") < pos("insert dbo.tbProduct"));
    assert!(pos("insert dbo.tbProduct") < pos("explicit_ids off dbo.tbProduct"));
    assert!(pos("explicit_ids off dbo.tbProduct") < pos("reseed dbo.tbProduct 4"));
    assert!(pos("reseed dbo.tbProduct 4") < pos("restore dbo.tbOrder"));
    assert!(pos("restore dbo.tbOrder") < pos("restore dbo.tbReview"));
}

#[tokio::test]
async fn test_resequence_table_skips_malformed_dependents() {
    let mut store = fixture();
    let report = resequence_table(
        &mut store,
        "tbProduct",
        "pid",
        &["tbOrder.pid", "not-a-reference", "tbReview.product_id", "a..b"],
    )
    .await
    .unwrap();

    assert_eq!(report.dependents.len(), 2);
    assert_eq!(report.state, ResequenceState::Committed);
}

#[tokio::test]
async fn test_store_rejects_explicit_ids_for_second_table() {
    let mut store = fixture();
    store.set_explicit_ids(&orders(), true).await.unwrap();
    let err = store.set_explicit_ids(&products(), true).await.unwrap_err();
    assert!(err.to_string().contains("already ON"));
    store.clear_explicit_ids().await.unwrap();
    assert_eq!(store.explicit_ids_engaged(), None);
}
