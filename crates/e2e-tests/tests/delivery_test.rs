//! At-least-once delivery tests.
//!
//! A log row disappears only when every consumer has accepted the batch
//! holding it and the tick has committed.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use dbsync_index::{IndexApplyConsumer, MemoryIndexEngine};
use dbsync_source::{SourceError, UpdateConsumer};
use dbsync_storage::FailPoint;
use dbsync_types::{EntityId, EventType};
use e2e_tests::{
    change, event_model_with_place_reference, index_metadata, RecordingConsumer, TestHarness,
    PLACE_LOG, SORCERER_LOG,
};

/// A failing consumer keeps the rows; the next tick redelivers them verbatim.
#[tokio::test]
async fn test_failed_consumer_batch_is_redelivered() {
    let harness = TestHarness::new();
    harness.insert_place(1, "Avalon");
    harness.update_place(1, "Avalon Isle");

    let source = harness.source(5, 100);
    let recorder = Arc::new(RecordingConsumer::new("recorder"));
    source
        .set_update_consumers(vec![recorder.clone() as Arc<dyn UpdateConsumer>])
        .unwrap();

    recorder.fail_next(1);
    let err = source.run_tick().await.unwrap_err();
    assert!(matches!(err, SourceError::Consumer { .. }));
    assert!(!err.is_fatal());
    assert_eq!(harness.pending_log_rows(PLACE_LOG), 2);

    source.run_tick().await.unwrap();
    let batches = recorder.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], batches[1]);
    assert_eq!(
        batches[1],
        vec![
            change("Place", 1, EventType::Insert),
            change("Place", 1, EventType::Update),
        ]
    );
    assert_eq!(harness.pending_log_rows(PLACE_LOG), 0);
    assert_eq!(source.status().error_count, 1);
}

/// When a later consumer fails, rows the earlier consumer accepted stay.
#[tokio::test]
async fn test_no_premature_consumption() {
    let harness = TestHarness::new();
    for id in 1..=3 {
        harness.insert_place(id, "somewhere");
    }

    let source = harness.source(2, 100);
    let first = Arc::new(RecordingConsumer::new("first"));
    let second = Arc::new(RecordingConsumer::new("second"));
    source
        .set_update_consumers(vec![
            first.clone() as Arc<dyn UpdateConsumer>,
            second.clone() as Arc<dyn UpdateConsumer>,
        ])
        .unwrap();

    second.fail_next(1);
    assert!(source.run_tick().await.is_err());
    assert_eq!(first.events().len(), 2);
    assert_eq!(harness.pending_log_rows(PLACE_LOG), 3);

    source.run_tick().await.unwrap();
    assert_eq!(harness.pending_log_rows(PLACE_LOG), 0);
    assert_eq!(second.events().len(), 2 + 3);
}

/// A commit failure after successful delivery redelivers the same events,
/// and the index ends in the same state as after a single application.
#[tokio::test]
async fn test_commit_failure_redelivery_is_idempotent() {
    let harness = TestHarness::new();
    harness.insert_place(1, "Avalon");
    harness.insert_sorcerer(2, "Merlin", Some(1));

    let engine = MemoryIndexEngine::new();
    let consumer = Arc::new(IndexApplyConsumer::new(
        Arc::new(engine.clone()),
        harness.provider(),
        Arc::new(index_metadata()),
    ));
    let source = harness.source(5, 100);
    source
        .set_update_consumers(vec![consumer as Arc<dyn UpdateConsumer>])
        .unwrap();

    harness.db.fail_next(FailPoint::Commit, 1);
    assert!(source.run_tick().await.is_err());
    let after_first = engine.documents();
    assert_eq!(after_first.len(), 2);
    assert_eq!(harness.pending_log_rows(PLACE_LOG), 1);

    source.run_tick().await.unwrap();
    assert_eq!(engine.documents(), after_first);
    assert_eq!(harness.pending_log_rows(PLACE_LOG), 0);

    let merlin = engine.document("Sorcerer", &EntityId::Int(2)).unwrap();
    assert!(merlin.references("place_id", &EntityId::Int(1)));
}

/// An unavailable database skips ticks without touching the log.
#[tokio::test]
async fn test_unavailable_database_skips() {
    let harness = TestHarness::new();
    harness.insert_place(1, "Avalon");
    let source = harness.source(5, 100);
    let recorder = Arc::new(RecordingConsumer::new("recorder"));
    source
        .set_update_consumers(vec![recorder.clone() as Arc<dyn UpdateConsumer>])
        .unwrap();

    harness.db.set_available(false);
    source.run_tick().await.unwrap();
    assert!(recorder.events().is_empty());
    assert_eq!(source.status().skipped_count, 1);

    harness.db.set_available(true);
    source.run_tick().await.unwrap();
    assert_eq!(recorder.events().len(), 1);
}

/// A sorcerer without a place yields only its own event; the row is still
/// consumed and the rows behind it are delivered in the same tick.
#[tokio::test]
async fn test_null_place_reference_is_delivered() {
    let harness = TestHarness::with_model(event_model_with_place_reference());
    harness.insert_place(1, "Avalon");
    harness.insert_sorcerer(4, "Nimue", None);
    harness.insert_sorcerer(5, "Merlin", Some(1));

    let source = harness.source(10, 100);
    let recorder = Arc::new(RecordingConsumer::new("recorder"));
    source
        .set_update_consumers(vec![recorder.clone() as Arc<dyn UpdateConsumer>])
        .unwrap();

    source.run_tick().await.unwrap();
    assert_eq!(
        recorder.events(),
        vec![
            change("Place", 1, EventType::Insert),
            change("Sorcerer", 4, EventType::Insert),
            change("Sorcerer", 5, EventType::Insert),
            change("Place", 1, EventType::Insert),
        ]
    );
    assert_eq!(harness.pending_log_rows(SORCERER_LOG), 0);
    assert_eq!(source.status().error_count, 0);

    harness.update_sorcerer(4, "Nimue", None);
    source.run_tick().await.unwrap();
    assert_eq!(
        recorder.batches().last().unwrap(),
        &vec![change("Sorcerer", 4, EventType::Update)]
    );
}
