mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use sofabed::{Couch, CouchError, Document, PhaseHook, TransactionPhase, TransactionStatus};

use common::{MockCouch, Op, capturing_logger, data_doc, fast_config, setup_couch};

fn recording_hook() -> (PhaseHook, Arc<Mutex<Vec<TransactionPhase>>>) {
    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&phases);
    let hook: PhaseHook = Arc::new(move |phase: &TransactionPhase| sink.lock().push(phase.clone()));
    (hook, phases)
}

fn record_status(mock: &MockCouch, txn: &str) -> serde_json::Value {
    mock.doc(&format!("txn:{txn}"))
        .and_then(|doc| doc.field("status").cloned())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_transaction_commits_all_documents() {
    let (mock, couch) = setup_couch();
    let rev = mock.insert(data_doc("a", "old"));
    let (hook, phases) = recording_hook();
    let couch = couch.with_phase_hook(hook);

    let outcomes = couch
        .bulk_save_transaction("t1", vec![data_doc("a", "new").with_rev(&rev), data_doc("b", "fresh")])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(mock.doc("a").unwrap().field("data"), Some(&json!("new")));
    assert_eq!(mock.doc("b").unwrap().field("data"), Some(&json!("fresh")));
    assert_eq!(record_status(&mock, "t1"), json!("completed"));

    let phases = phases.lock();
    assert_eq!(phases.len(), 7);
    assert_eq!(
        phases[0],
        TransactionPhase::Created {
            record_id: "txn:t1".to_string()
        }
    );
    assert_eq!(phases[1], TransactionPhase::RevisionsFetched { found: 1, not_found: 1 });
    assert_eq!(phases[2], TransactionPhase::RevisionsChecked);
    assert_eq!(phases[3], TransactionPhase::Started);
    assert!(matches!(phases[4], TransactionPhase::UpdatesApplied { ref outcomes } if outcomes.len() == 2));
    assert_eq!(phases[5], TransactionPhase::Completed);
    assert_eq!(
        phases[6],
        TransactionPhase::StatusRecorded {
            status: TransactionStatus::Completed,
            persisted: true
        }
    );
}

#[tokio::test]
async fn test_partial_failure_is_compensated() {
    let (mock, couch) = setup_couch();
    let rev = mock.insert(data_doc("a", "old"));
    mock.fail_id("c");

    let err = couch
        .bulk_save_transaction(
            "t2",
            vec![
                data_doc("a", "new").with_rev(&rev),
                data_doc("b", "fresh"),
                data_doc("c", "rejected"),
            ],
        )
        .await
        .unwrap_err();

    let CouchError::Rollback {
        status,
        cause,
        outcomes,
        compensation_error,
    } = err
    else {
        panic!("expected a rollback, got {err:?}");
    };
    assert_eq!(status, TransactionStatus::RolledBack);
    assert!(compensation_error.is_none());
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    match *cause {
        CouchError::BulkOperation { failed } => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].id.as_deref(), Some("c"));
        }
        other => panic!("unexpected cause {other:?}"),
    }

    // The update is undone in content, under a newer revision.
    let a = mock.doc("a").unwrap();
    assert_eq!(a.field("data"), Some(&json!("old")));
    assert!(a.rev.unwrap().starts_with("3-"));
    // The created document is tombstoned, the rejected one never existed.
    assert!(mock.is_deleted("b"));
    assert!(mock.doc("c").is_none());
    assert_eq!(record_status(&mock, "t2"), json!("rolled_back"));
}

#[tokio::test]
async fn test_stale_revision_aborts_before_writing() {
    let (mock, couch) = setup_couch();
    let rev = mock.insert(data_doc("a", "old"));

    let err = couch
        .bulk_save_transaction(
            "t3",
            vec![data_doc("a", "new").with_rev("1-stale"), data_doc("b", "fresh")],
        )
        .await
        .unwrap_err();

    match err {
        CouchError::VersionConflict { ids } => assert_eq!(ids, vec!["a".to_string()]),
        other => panic!("expected a version conflict, got {other:?}"),
    }
    assert_eq!(mock.calls(Op::WriteBulk), 0);
    assert_eq!(mock.rev("a"), Some(rev));
    assert!(mock.doc("b").is_none());
}

#[tokio::test]
async fn test_revision_for_missing_document_conflicts() {
    let (mock, couch) = setup_couch();

    let err = couch
        .bulk_save_transaction("t4", vec![data_doc("ghost", "x").with_rev("2-abc")])
        .await
        .unwrap_err();

    assert!(matches!(err, CouchError::VersionConflict { ref ids } if ids == &["ghost".to_string()]));
    assert_eq!(mock.calls(Op::WriteBulk), 0);
}

#[tokio::test]
async fn test_setup_failure_writes_nothing() {
    let (mock, couch) = setup_couch();
    mock.accept_puts(0);

    let err = couch
        .bulk_save_transaction("t5", vec![data_doc("a", "x")])
        .await
        .unwrap_err();

    match err {
        CouchError::TransactionSetup { outcome, .. } => {
            assert_eq!(outcome.unwrap().error.as_deref(), Some("forbidden"));
        }
        other => panic!("expected a setup failure, got {other:?}"),
    }
    assert_eq!(mock.calls(Op::BulkGet), 0);
    assert_eq!(mock.calls(Op::WriteBulk), 0);
    assert!(mock.doc("a").is_none());
}

#[tokio::test]
async fn test_failed_compensation_is_reported() {
    let (mock, couch) = setup_couch();
    mock.fail_id("c");
    mock.fail_write_call(2);

    let err = couch
        .bulk_save_transaction("t6", vec![data_doc("b", "fresh"), data_doc("c", "rejected")])
        .await
        .unwrap_err();

    match err {
        CouchError::Rollback {
            status,
            outcomes,
            compensation_error,
            ..
        } => {
            assert_eq!(status, TransactionStatus::RollbackFailed);
            assert!(outcomes.is_empty());
            assert!(matches!(
                compensation_error.as_deref(),
                Some(CouchError::UnexpectedStatus { status: 400, .. })
            ));
        }
        other => panic!("expected a rollback, got {other:?}"),
    }
    // The partial write is still there and the record says so.
    assert!(mock.doc("b").is_some());
    assert_eq!(record_status(&mock, "t6"), json!("rollback_failed"));
}

#[tokio::test]
async fn test_duplicate_ids_are_rejected() {
    let (mock, couch) = setup_couch();

    let err = couch
        .bulk_save_transaction("t7", vec![data_doc("a", "1"), data_doc("a", "2")])
        .await
        .unwrap_err();

    assert!(matches!(err, CouchError::DuplicateIds { ref ids } if ids == &["a".to_string()]));
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn test_invalid_document_is_rejected() {
    let (mock, couch) = setup_couch();

    let err = couch
        .bulk_save_transaction("t8", vec![Document::new("")])
        .await
        .unwrap_err();

    assert!(matches!(err, CouchError::InvalidDocument { .. }));
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn test_unrecorded_status_does_not_fail_the_transaction() {
    let (mock, couch) = setup_couch();
    mock.accept_puts(1);
    let (hook, phases) = recording_hook();
    let couch = couch.with_phase_hook(hook);

    let outcomes = couch
        .bulk_save_transaction("t9", vec![data_doc("a", "x")])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(record_status(&mock, "t9"), json!("pending"));
    assert_eq!(
        phases.lock().last(),
        Some(&TransactionPhase::StatusRecorded {
            status: TransactionStatus::Completed,
            persisted: false
        })
    );
}

#[tokio::test]
async fn test_unrecorded_status_is_logged() {
    let mock = Arc::new(MockCouch::new());
    let (logger, lines) = capturing_logger();
    let couch = Couch::from_shared(Arc::clone(&mock), fast_config(), logger).unwrap();
    mock.accept_puts(1);

    couch
        .bulk_save_transaction("t9b", vec![data_doc("a", "x")])
        .await
        .unwrap();

    let lines = lines.lock();
    assert!(lines.iter().any(|line| line.starts_with("ERROR")
        && line.contains("Failed to update transaction status to completed")));
}

#[tokio::test]
async fn test_rejected_write_with_nothing_applied_rolls_back() {
    let (mock, couch) = setup_couch();
    let rev = mock.insert(data_doc("a", "old"));
    mock.fail_write_call(1);

    let err = couch
        .bulk_save_transaction("t12", vec![data_doc("a", "new").with_rev(&rev), data_doc("b", "fresh")])
        .await
        .unwrap_err();

    match err {
        CouchError::Rollback {
            status,
            cause,
            outcomes,
            compensation_error,
        } => {
            assert_eq!(status, TransactionStatus::RolledBack);
            assert!(outcomes.is_empty());
            assert!(compensation_error.is_none());
            assert!(matches!(*cause, CouchError::UnexpectedStatus { status: 400, .. }));
        }
        other => panic!("expected a rollback, got {other:?}"),
    }
    // No compensating write was needed.
    assert_eq!(mock.calls(Op::WriteBulk), 1);
    assert_eq!(mock.rev("a"), Some(rev));
    assert!(mock.doc("b").is_none());
    assert_eq!(record_status(&mock, "t12"), json!("rolled_back"));
}

#[tokio::test]
async fn test_lost_write_response_is_compensated() {
    let (mock, couch) = setup_couch();
    let rev = mock.insert(data_doc("a", "old"));
    mock.lose_write_response(1);

    let err = couch
        .bulk_save_transaction("t13", vec![data_doc("a", "new").with_rev(&rev), data_doc("b", "fresh")])
        .await
        .unwrap_err();

    match err {
        CouchError::Rollback {
            status,
            cause,
            outcomes,
            compensation_error,
        } => {
            assert_eq!(status, TransactionStatus::RolledBack);
            assert!(compensation_error.is_none());
            assert_eq!(outcomes.len(), 2);
            assert!(outcomes.iter().all(|o| o.is_ok()));
            assert!(cause.is_transient());
        }
        other => panic!("expected a rollback, got {other:?}"),
    }
    // The batch was applied, then undone from a fresh read.
    assert_eq!(mock.calls(Op::WriteBulk), 2);
    assert_eq!(mock.calls(Op::BulkGet), 2);
    let a = mock.doc("a").unwrap();
    assert_eq!(a.field("data"), Some(&json!("old")));
    assert!(a.rev.unwrap().starts_with("3-"));
    assert!(mock.is_deleted("b"));
    assert_eq!(record_status(&mock, "t13"), json!("rolled_back"));
}

#[tokio::test]
async fn test_lost_write_response_without_reread_fails_rollback() {
    let (mock, couch) = setup_couch();
    mock.lose_write_response(1);
    mock.fail_read_call(2);

    let err = couch
        .bulk_save_transaction("t14", vec![data_doc("a", "x")])
        .await
        .unwrap_err();

    match err {
        CouchError::Rollback {
            status,
            outcomes,
            compensation_error,
            ..
        } => {
            assert_eq!(status, TransactionStatus::RollbackFailed);
            assert!(outcomes.is_empty());
            assert!(matches!(
                compensation_error.as_deref(),
                Some(CouchError::UnexpectedStatus { status: 400, .. })
            ));
        }
        other => panic!("expected a rollback, got {other:?}"),
    }
    // What was written stays, and the record says so.
    assert_eq!(mock.calls(Op::WriteBulk), 1);
    assert!(mock.doc("a").is_some());
    assert_eq!(record_status(&mock, "t14"), json!("rollback_failed"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_record_failures_are_retried() {
    let (mock, couch) = setup_couch();
    mock.fail_next(Op::Put, 2);
    mock.fail_next(Op::BulkGet, 1);

    couch
        .bulk_save_transaction("t10", vec![data_doc("a", "x")])
        .await
        .unwrap();

    // Two failed record writes, the pending record, then the final status.
    assert_eq!(mock.calls(Op::Put), 4);
    assert_eq!(mock.calls(Op::BulkGet), 2);
    assert_eq!(mock.calls(Op::WriteBulk), 1);
    assert_eq!(record_status(&mock, "t10"), json!("completed"));
}

#[tokio::test]
async fn test_concurrent_change_after_check_is_compensated() {
    let (mock, couch) = setup_couch();
    let rev = mock.insert(data_doc("a", "old"));

    // Another writer updates `a` between the revision check and the write.
    let intruder = Arc::clone(&mock);
    let hook: PhaseHook = Arc::new(move |phase: &TransactionPhase| {
        if *phase == TransactionPhase::RevisionsChecked {
            intruder.insert(data_doc("a", "theirs"));
        }
    });
    let couch = couch.with_phase_hook(hook);

    let err = couch
        .bulk_save_transaction("t11", vec![data_doc("a", "mine").with_rev(&rev), data_doc("b", "mine")])
        .await
        .unwrap_err();

    match err {
        CouchError::Rollback { status, cause, .. } => {
            assert_eq!(status, TransactionStatus::RolledBack);
            match *cause {
                CouchError::BulkOperation { failed } => assert!(failed[0].is_conflict()),
                other => panic!("unexpected cause {other:?}"),
            }
        }
        other => panic!("expected a rollback, got {other:?}"),
    }
    assert_eq!(mock.doc("a").unwrap().field("data"), Some(&json!("theirs")));
    assert!(mock.is_deleted("b"));
}
