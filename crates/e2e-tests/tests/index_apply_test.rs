//! Change capture into an index, end to end.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use dbsync_index::{
    IndexApplyConsumer, IndexMetadata, IndexOperation, IndexRootMetadata, MemoryIndexEngine,
    TantivyEngineConfig, TantivyIndexEngine,
};
use dbsync_source::{PollerState, UpdateConsumer};
use dbsync_types::{EntityId, EventType};
use e2e_tests::{
    change, index_metadata, DatabaseEntityProvider, RecordingConsumer, TestHarness, PLACE_LOG,
};

struct Pipeline {
    harness: TestHarness,
    engine: MemoryIndexEngine,
    provider: Arc<DatabaseEntityProvider>,
    recorder: Arc<RecordingConsumer>,
    source: dbsync_source::UpdateSource,
}

fn pipeline() -> Pipeline {
    pipeline_with(index_metadata())
}

fn pipeline_with(metadata: IndexMetadata) -> Pipeline {
    let harness = TestHarness::new();
    let engine = MemoryIndexEngine::new();
    let provider = harness.provider();
    let consumer = IndexApplyConsumer::new(
        Arc::new(engine.clone()),
        provider.clone(),
        Arc::new(metadata),
    )
    .with_cascade_page_size(2);
    let recorder = Arc::new(RecordingConsumer::new("recorder"));
    let source = harness.source(5, 100);
    source
        .set_update_consumers(vec![
            recorder.clone() as Arc<dyn UpdateConsumer>,
            Arc::new(consumer) as Arc<dyn UpdateConsumer>,
        ])
        .unwrap();
    Pipeline {
        harness,
        engine,
        provider,
        recorder,
        source,
    }
}

/// Insert Place#1, then delete it: add-or-replace after a fetch, then a
/// direct delete without any lookup query.
#[tokio::test]
async fn test_place_insert_then_delete() {
    let places_only = IndexMetadata::builder()
        .root(IndexRootMetadata::new("Place"))
        .build()
        .unwrap();
    let p = pipeline_with(places_only);

    p.harness.insert_place(1, "Avalon");
    p.source.run_tick().await.unwrap();
    assert_eq!(p.recorder.events(), vec![change("Place", 1, EventType::Insert)]);
    assert_eq!(p.provider.loads(), vec![("Place".to_string(), EntityId::Int(1))]);
    assert!(p.engine.operations().contains(&IndexOperation::AddOrReplace {
        root_type: "Place".into(),
        id: EntityId::Int(1),
    }));
    assert_eq!(p.harness.pending_log_rows(PLACE_LOG), 0);

    p.engine.clear_operations();
    p.harness.delete_place(1);
    p.source.run_tick().await.unwrap();
    assert_eq!(
        p.recorder.batches().last().unwrap(),
        &vec![change("Place", 1, EventType::Delete)]
    );
    assert_eq!(
        p.engine.operations(),
        vec![
            IndexOperation::DeleteById {
                root_type: "Place".into(),
                id: EntityId::Int(1),
            },
            IndexOperation::Commit,
        ]
    );
    assert!(p.engine.document("Place", &EntityId::Int(1)).is_none());
}

/// Deleting an embedded Place re-indexes the only Sorcerer referencing it
/// without the place, and never deletes the Sorcerer document.
#[tokio::test]
async fn test_cascading_delete_reindexes_root() {
    let p = pipeline();
    p.harness.insert_place(1, "Avalon");
    p.harness.insert_sorcerer(2, "Merlin", Some(1));
    p.harness.insert_sorcerer(3, "Nimue", None);
    p.source.run_tick().await.unwrap();

    let merlin = p.engine.document("Sorcerer", &EntityId::Int(2)).unwrap();
    assert!(merlin.text().contains("Avalon"));

    p.engine.clear_operations();
    p.harness.delete_place(1);
    p.source.run_tick().await.unwrap();

    let ops = p.engine.operations();
    let sorcerer_deletes = ops
        .iter()
        .filter(|op| matches!(op, IndexOperation::DeleteById { root_type, .. } if root_type == "Sorcerer"))
        .count();
    assert_eq!(sorcerer_deletes, 0);
    let reindexed: Vec<&IndexOperation> = ops
        .iter()
        .filter(|op| matches!(op, IndexOperation::AddOrReplace { root_type, .. } if root_type == "Sorcerer"))
        .collect();
    assert_eq!(
        reindexed,
        vec![&IndexOperation::AddOrReplace {
            root_type: "Sorcerer".into(),
            id: EntityId::Int(2),
        }]
    );

    let merlin = p.engine.document("Sorcerer", &EntityId::Int(2)).unwrap();
    assert!(!merlin.text().contains("Avalon"));
    assert!(!merlin.references("place_id", &EntityId::Int(1)));
    assert!(p.engine.document("Sorcerer", &EntityId::Int(3)).is_some());
}

/// Renaming a place reaches every sorcerer living there, across lookup pages.
#[tokio::test]
async fn test_embedded_update_cascades_over_pages() {
    let p = pipeline();
    p.harness.insert_place(1, "Avalon");
    for id in 10..15 {
        p.harness.insert_sorcerer(id, "apprentice", Some(1));
    }
    p.source.run_tick().await.unwrap();

    p.engine.clear_operations();
    p.harness.update_place(1, "Isle of Apples");
    p.source.run_tick().await.unwrap();

    for id in 10..15 {
        let doc = p.engine.document("Sorcerer", &EntityId::Int(id)).unwrap();
        assert!(doc.text().contains("Isle of Apples"), "sorcerer {} not re-indexed", id);
    }
    let queries = p
        .engine
        .operations()
        .into_iter()
        .filter(|op| matches!(op, IndexOperation::Query { .. }))
        .count();
    // five matches with two per page: pages of 2, 2, 1
    assert_eq!(queries, 3);
}

/// A sorcerer deleted before its place: the cascade skips it and its own
/// delete removes it.
#[tokio::test]
async fn test_cascade_skips_deleted_roots() {
    let p = pipeline();
    p.harness.insert_place(1, "Avalon");
    p.harness.insert_sorcerer(2, "Merlin", Some(1));
    p.source.run_tick().await.unwrap();

    p.harness.delete_place(1);
    p.harness.delete_sorcerer(2);
    p.source.run_tick().await.unwrap();

    assert!(p.engine.documents().is_empty());
}

/// The background poller feeds a Tantivy index until stopped.
#[tokio::test]
async fn test_tantivy_index_with_background_poller() {
    let harness = TestHarness::new();
    let engine =
        TantivyIndexEngine::open_or_create(TantivyEngineConfig::new(&harness.index_path)).unwrap();
    let consumer = IndexApplyConsumer::new(
        Arc::new(engine.clone()),
        harness.provider(),
        Arc::new(index_metadata()),
    );
    let source = harness.source(5, 100);
    source
        .set_update_consumers(vec![Arc::new(consumer) as Arc<dyn UpdateConsumer>])
        .unwrap();
    source.start().unwrap();
    assert_eq!(source.state(), PollerState::Running);

    harness.insert_place(1, "Avalon");
    harness.insert_sorcerer(2, "Merlin", Some(1));
    harness.insert_sorcerer(3, "Morgana", Some(1));
    wait_for(|| engine.num_docs() == 3).await;

    assert_eq!(engine.search_text("Sorcerer", "merlin", 10).unwrap(), vec![EntityId::Int(2)]);

    harness.delete_place(1);
    wait_for(|| {
        engine.num_docs() == 2 && engine.search_text("Sorcerer", "avalon", 10).unwrap().is_empty()
    })
    .await;
    let merlin = engine.document("Sorcerer", &EntityId::Int(2)).unwrap().unwrap();
    assert!(merlin.embedded.is_empty());

    source.stop().await;
    assert_eq!(source.state(), PollerState::Stopped);
    assert_eq!(source.status().error_count, 0);
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 5s");
}
