//! Applies change event batches to an index.
//!
//! For every event the consumer visits each root type that contains the
//! event's entity class. When the entity is the root itself it is loaded
//! and stored, or deleted by id. When it is embedded, the root documents
//! referencing it are looked up page by page, loaded again and stored in
//! full, which drops data of embedded entities that no longer exist.
//!
//! All mutations of one batch share one unit of work. Any failure rolls it
//! back and fails the batch so that the update source redelivers it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use dbsync_source::{ConsumerError, UpdateConsumer};
use dbsync_types::{ChangeEvent, EntityId, EventType, Settings};

use crate::document::{FieldCondition, IndexDocument};
use crate::engine::{EntityProvider, IndexEngine, IndexWork};
use crate::error::IndexError;
use crate::metadata::IndexMetadata;

pub const DEFAULT_CASCADE_PAGE_SIZE: usize = 100;

/// Current state of the roots changed in one batch, keyed by root type and
/// normalised id. Absent keys were gone from the source at load time.
type LoadedRoots = HashMap<(String, EntityId), IndexDocument>;

/// Counters of one applied batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub events: usize,
    /// Root documents stored because the root itself changed
    pub added: usize,
    pub deleted: usize,
    /// Root documents stored again because an embedded entity changed
    pub reindexed: usize,
    /// Reference lookup pages queried
    pub lookups: usize,
    /// Entities gone from the source by the time they were loaded
    pub skipped_missing: usize,
    /// Events whose entity class no index contains
    pub ignored: usize,
}

/// [`UpdateConsumer`] keeping an index in sync with change events.
pub struct IndexApplyConsumer {
    name: String,
    engine: Arc<dyn IndexEngine>,
    provider: Arc<dyn EntityProvider>,
    metadata: Arc<IndexMetadata>,
    cascade_page_size: usize,
}

impl IndexApplyConsumer {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        provider: Arc<dyn EntityProvider>,
        metadata: Arc<IndexMetadata>,
    ) -> Self {
        Self {
            name: "index-apply".to_string(),
            engine,
            provider,
            metadata,
            cascade_page_size: DEFAULT_CASCADE_PAGE_SIZE,
        }
    }

    /// Consumer using the configured cascade page size.
    pub fn from_settings(
        engine: Arc<dyn IndexEngine>,
        provider: Arc<dyn EntityProvider>,
        metadata: Arc<IndexMetadata>,
        settings: &Settings,
    ) -> Self {
        Self::new(engine, provider, metadata).with_cascade_page_size(settings.cascade_page_size)
    }

    pub fn cascade_page_size(&self) -> usize {
        self.cascade_page_size
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Page size of reference lookups. Zero is raised to one.
    pub fn with_cascade_page_size(mut self, size: usize) -> Self {
        self.cascade_page_size = size.max(1);
        self
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    /// Apply one batch in a single unit of work.
    pub async fn apply(&self, events: &[ChangeEvent]) -> Result<ApplyStats, IndexError> {
        let started = Instant::now();
        let mut work = self.engine.begin().await?;
        let mut stats = ApplyStats {
            events: events.len(),
            ..ApplyStats::default()
        };

        let loaded = match self.load_changed_roots(events).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(
                    consumer = %self.name,
                    events = events.len(),
                    error = %e,
                    "Failed to load changed roots, index may be inconsistent"
                );
                if let Err(rollback) = work.rollback().await {
                    warn!(error = %rollback, "Index rollback failed");
                }
                return Err(e);
            }
        };

        for event in events {
            if let Err(e) = self
                .apply_event(work.as_mut(), event, &loaded, &mut stats)
                .await
            {
                error!(
                    consumer = %self.name,
                    entity = %event.entity_class,
                    id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to apply change event, index may be inconsistent"
                );
                if let Err(rollback) = work.rollback().await {
                    warn!(error = %rollback, "Index rollback failed");
                }
                return Err(e);
            }
        }

        if let Err(e) = work.commit().await {
            error!(
                consumer = %self.name,
                events = events.len(),
                error = %e,
                "Index commit failed, index may be inconsistent"
            );
            return Err(e);
        }

        info!(
            consumer = %self.name,
            events = stats.events,
            added = stats.added,
            deleted = stats.deleted,
            reindexed = stats.reindexed,
            lookups = stats.lookups,
            skipped_missing = stats.skipped_missing,
            ignored = stats.ignored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Applied change batch"
        );
        Ok(stats)
    }

    /// Fetch every root inserted or updated in the batch, one batched load
    /// per root type.
    async fn load_changed_roots(&self, events: &[ChangeEvent]) -> Result<LoadedRoots, IndexError> {
        let mut wanted: BTreeMap<&str, Vec<EntityId>> = BTreeMap::new();
        let mut seen: HashSet<(&str, EntityId)> = HashSet::new();
        for event in events {
            if event.event_type == EventType::Delete || !self.metadata.is_root(&event.entity_class) {
                continue;
            }
            let root_type = event.entity_class.as_str();
            let id = self.metadata.normalize_root_id(root_type, &event.id)?;
            if seen.insert((root_type, id.clone())) {
                wanted.entry(root_type).or_default().push(id);
            }
        }

        let mut loaded = LoadedRoots::new();
        for (root_type, ids) in wanted {
            let docs = self.provider.load_batch(root_type, &ids).await?;
            debug!(
                root = root_type,
                requested = ids.len(),
                found = docs.len(),
                "Loaded changed roots"
            );
            for doc in docs {
                let doc = self.metadata.normalize_document(doc)?;
                loaded.insert((doc.root_type.clone(), doc.id.clone()), doc);
            }
        }
        Ok(loaded)
    }

    async fn apply_event(
        &self,
        work: &mut dyn IndexWork,
        event: &ChangeEvent,
        loaded: &LoadedRoots,
        stats: &mut ApplyStats,
    ) -> Result<(), IndexError> {
        let roots = self.metadata.contained_in_index_of(&event.entity_class);
        if roots.is_empty() {
            debug!(entity = %event.entity_class, "Entity class not indexed, ignoring event");
            stats.ignored += 1;
            return Ok(());
        }

        for root_type in roots {
            if *root_type == event.entity_class {
                self.apply_to_root(work, root_type, event, loaded, stats)
                    .await?;
            } else {
                self.reindex_containing(work, root_type, event, stats).await?;
            }
        }
        Ok(())
    }

    async fn apply_to_root(
        &self,
        work: &mut dyn IndexWork,
        root_type: &str,
        event: &ChangeEvent,
        loaded: &LoadedRoots,
        stats: &mut ApplyStats,
    ) -> Result<(), IndexError> {
        let id = self.metadata.normalize_root_id(root_type, &event.id)?;
        match event.event_type {
            EventType::Insert | EventType::Update => {
                match loaded.get(&(root_type.to_string(), id.clone())) {
                    Some(doc) => {
                        work.add_or_replace(doc.clone()).await?;
                        stats.added += 1;
                    }
                    None => {
                        debug!(root = root_type, id = %id, "Entity no longer exists, skipping");
                        stats.skipped_missing += 1;
                    }
                }
            }
            EventType::Delete => {
                work.delete_by_id(root_type, &id).await?;
                stats.deleted += 1;
            }
        }
        Ok(())
    }

    /// Store again every `root_type` document that embeds the event's
    /// entity through any of its reference fields.
    async fn reindex_containing(
        &self,
        work: &mut dyn IndexWork,
        root_type: &str,
        event: &ChangeEvent,
        stats: &mut ApplyStats,
    ) -> Result<(), IndexError> {
        let root = self
            .metadata
            .root(root_type)
            .ok_or_else(|| IndexError::Metadata(format!("{} is not an index root", root_type)))?;
        let mut seen: HashSet<EntityId> = HashSet::new();

        for field in root.fields_embedding(&event.entity_class) {
            let value = field.kind.normalize(&field.id_field, &event.id)?;
            let condition = FieldCondition::new(field.id_field.clone(), value);
            let mut offset = 0;
            loop {
                let ids = self
                    .engine
                    .query_ids(root_type, &condition, offset, self.cascade_page_size)
                    .await?;
                stats.lookups += 1;
                let page_len = ids.len();
                offset += page_len;

                let fresh: Vec<EntityId> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
                if !fresh.is_empty() {
                    let docs = self.provider.load_batch(root_type, &fresh).await?;
                    stats.skipped_missing += fresh.len().saturating_sub(docs.len());
                    for doc in docs {
                        work.add_or_replace(self.metadata.normalize_document(doc)?)
                            .await?;
                        stats.reindexed += 1;
                    }
                }
                debug!(
                    root = root_type,
                    field = %condition.field,
                    value = %condition.value,
                    matched = page_len,
                    "Re-indexed page of containing documents"
                );
                if page_len < self.cascade_page_size {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UpdateConsumer for IndexApplyConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_event(&self, events: &[ChangeEvent]) -> Result<(), ConsumerError> {
        self.apply(events).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{IndexOperation, MemoryEntityStore, MemoryIndexEngine};
    use crate::metadata::{FieldKind, IndexRootMetadata};

    struct Fixture {
        engine: MemoryIndexEngine,
        store: MemoryEntityStore,
        consumer: IndexApplyConsumer,
    }

    fn fixture(page_size: usize) -> Fixture {
        let metadata = IndexMetadata::builder()
            .root(IndexRootMetadata::new("Place"))
            .root(
                IndexRootMetadata::new("Sorcerer")
                    .embeds("Place", "place_id", FieldKind::Numeric)
                    .embeds("Wand", "wand_code", FieldKind::String),
            )
            .build()
            .unwrap();
        let engine = MemoryIndexEngine::new();
        let store = MemoryEntityStore::new();
        let consumer = IndexApplyConsumer::new(
            Arc::new(engine.clone()),
            Arc::new(store.clone()),
            Arc::new(metadata),
        )
        .with_cascade_page_size(page_size);
        Fixture {
            engine,
            store,
            consumer,
        }
    }

    fn place(id: i64, name: &str) -> IndexDocument {
        IndexDocument::new("Place", EntityId::Int(id)).field("name", name)
    }

    fn sorcerer(id: i64, place: Option<i64>) -> IndexDocument {
        let doc = IndexDocument::new("Sorcerer", EntityId::Int(id)).field("name", format!("s{}", id));
        match place {
            Some(p) => doc.embed("place_id", EntityId::Int(p)),
            None => doc,
        }
    }

    fn event(class: &str, id: i64, event_type: EventType) -> ChangeEvent {
        ChangeEvent::new(class, EntityId::Int(id), event_type)
    }

    #[tokio::test]
    async fn test_root_insert_then_delete() {
        let f = fixture(10);
        f.store.put(place(1, "Avalon"));

        let stats = f.consumer.apply(&[event("Place", 1, EventType::Insert)]).await.unwrap();
        assert_eq!(stats.added, 1);
        assert!(f.engine.document("Place", &EntityId::Int(1)).is_some());

        f.engine.clear_operations();
        f.store.remove("Place", &EntityId::Int(1));
        let stats = f.consumer.apply(&[event("Place", 1, EventType::Delete)]).await.unwrap();
        assert_eq!(stats.deleted, 1);
        let ops = f.engine.operations();
        assert!(ops.contains(&IndexOperation::DeleteById {
            root_type: "Place".into(),
            id: EntityId::Int(1),
        }));
        assert!(f.engine.document("Place", &EntityId::Int(1)).is_none());
    }

    #[tokio::test]
    async fn test_missing_entity_is_skipped() {
        let f = fixture(10);
        let stats = f.consumer.apply(&[event("Place", 9, EventType::Update)]).await.unwrap();
        assert_eq!(stats.skipped_missing, 1);
        assert_eq!(stats.added, 0);
        assert!(f.engine.documents().is_empty());
    }

    #[tokio::test]
    async fn test_embedded_delete_reindexes_containing_roots() {
        let f = fixture(2);
        for id in 1..=5 {
            let doc = sorcerer(id, Some(if id == 4 { 8 } else { 7 }));
            f.store.put(doc.clone());
            f.engine.seed(doc);
        }
        // sorcerer 3 moved elsewhere in the source; its stored document is stale
        f.store.put(sorcerer(3, None));
        // sorcerer 5 is gone from the source
        f.store.remove("Sorcerer", &EntityId::Int(5));

        let stats = f.consumer.apply(&[event("Place", 7, EventType::Delete)]).await.unwrap();
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.reindexed, 3);
        assert_eq!(stats.skipped_missing, 1);
        assert_eq!(stats.lookups, 3);

        let deletes: Vec<_> = f
            .engine
            .operations()
            .into_iter()
            .filter(|op| matches!(op, IndexOperation::DeleteById { root_type, .. } if root_type == "Sorcerer"))
            .collect();
        assert!(deletes.is_empty());
        let stored = f.engine.document("Sorcerer", &EntityId::Int(3)).unwrap();
        assert!(!stored.references("place_id", &EntityId::Int(7)));
    }

    #[tokio::test]
    async fn test_embedded_update_reaches_roots() {
        let f = fixture(10);
        f.engine.seed(sorcerer(1, Some(7)));
        f.store.put(sorcerer(1, Some(7)).field("place_name", "Camelot"));
        f.store.put(place(7, "Camelot"));

        let stats = f.consumer.apply(&[event("Place", 7, EventType::Update)]).await.unwrap();
        assert_eq!(stats.added, 1);
        assert_eq!(stats.reindexed, 1);
        let stored = f.engine.document("Sorcerer", &EntityId::Int(1)).unwrap();
        assert!(stored.text().contains("Camelot"));
    }

    #[tokio::test]
    async fn test_string_reference_lookup() {
        let f = fixture(10);
        let doc = IndexDocument::new("Sorcerer", EntityId::Int(1))
            .embed("wand_code", EntityId::Text("007".into()));
        f.engine.seed(doc.clone());
        f.store.put(doc);

        let event = ChangeEvent::new("Wand", EntityId::Text("007".into()), EventType::Delete);
        let stats = f.consumer.apply(&[event]).await.unwrap();
        assert_eq!(stats.reindexed, 1);
        assert!(f.engine.operations().contains(&IndexOperation::Query {
            root_type: "Sorcerer".into(),
            condition: FieldCondition::new("wand_code", EntityId::Text("007".into())),
        }));
    }

    #[tokio::test]
    async fn test_unindexed_class_ignored() {
        let f = fixture(10);
        let stats = f.consumer.apply(&[event("Broom", 1, EventType::Insert)]).await.unwrap();
        assert_eq!(stats.ignored, 1);
        assert_eq!(f.engine.operations(), vec![IndexOperation::Commit]);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_batch() {
        let f = fixture(10);
        f.store.put(place(1, "Avalon"));
        f.store.put(place(2, "Lyonesse"));
        let events = [event("Place", 1, EventType::Insert), event("Place", 2, EventType::Insert)];

        f.engine.fail_next_commits(1);
        assert!(f.consumer.update_event(&events).await.is_err());
        assert!(f.engine.documents().is_empty());

        f.store.fail_next_loads(1);
        assert!(f.consumer.apply(&events).await.is_err());
        assert_eq!(f.engine.operations().last(), Some(&IndexOperation::Rollback));
        assert!(f.engine.documents().is_empty());

        // redelivery of the same batch succeeds
        f.consumer.apply(&events).await.unwrap();
        assert_eq!(f.engine.documents().len(), 2);
    }

    #[tokio::test]
    async fn test_changed_roots_loaded_in_one_batch_per_type() {
        let f = fixture(10);
        f.store.put(place(1, "Avalon"));
        f.store.put(place(2, "Lyonesse"));
        f.store.put(sorcerer(5, None));
        let events = [
            event("Place", 1, EventType::Insert),
            event("Sorcerer", 5, EventType::Insert),
            event("Place", 2, EventType::Insert),
            event("Place", 1, EventType::Update),
            event("Place", 3, EventType::Insert),
        ];

        let stats = f.consumer.apply(&events).await.unwrap();
        assert_eq!(
            f.store.batch_loads(),
            vec![("Place".to_string(), 3), ("Sorcerer".to_string(), 1)]
        );
        assert_eq!(stats.added, 4);
        assert_eq!(stats.skipped_missing, 1);
        assert_eq!(f.engine.documents().len(), 3);
    }

    #[tokio::test]
    async fn test_insert_then_delete_in_one_batch() {
        let f = fixture(10);
        f.store.put(place(1, "Avalon"));
        let events = [
            event("Place", 1, EventType::Insert),
            event("Place", 1, EventType::Delete),
        ];
        f.consumer.apply(&events).await.unwrap();
        assert!(f.engine.document("Place", &EntityId::Int(1)).is_none());
    }

    #[test]
    fn test_from_settings_uses_cascade_page_size() {
        let settings = Settings {
            cascade_page_size: 7,
            ..Settings::default()
        };
        let consumer = IndexApplyConsumer::from_settings(
            Arc::new(MemoryIndexEngine::new()),
            Arc::new(MemoryEntityStore::new()),
            Arc::new(IndexMetadata::default()),
            &settings,
        );
        assert_eq!(consumer.cascade_page_size(), 7);
    }

    #[tokio::test]
    async fn test_numeric_root_rejects_text_id() {
        let f = fixture(10);
        let event = ChangeEvent::new("Place", EntityId::Text("north".into()), EventType::Delete);
        let err = f.consumer.apply(&[event]).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
