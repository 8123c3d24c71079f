//! End-to-end test infrastructure for dbsync.
//!
//! Provides a shared TestHarness over an in-memory database with two
//! original tables, `place` and `sorcerer`, each shadowed by an update-log
//! table, plus consumers and an entity provider that read from it.
//!
//! A sorcerer lives in a place. The `Sorcerer` index root embeds `Place`
//! through its `place_id` reference field.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use dbsync_index::{
    EntityProvider, FieldKind, IndexDocument, IndexError, IndexMetadata, IndexRootMetadata,
};
use dbsync_model::{EventModelInfo, IdBridge, IdInfo};
use dbsync_source::{ConsumerError, SourceConfig, UpdateConsumer, UpdateSource};
use dbsync_storage::MemoryDatabase;
use dbsync_types::{ChangeEvent, ColumnValue, EntityId, Row};

pub const PLACE_TABLE: &str = "place";
pub const PLACE_LOG: &str = "place_updates";
pub const SORCERER_TABLE: &str = "sorcerer";
pub const SORCERER_LOG: &str = "sorcerer_updates";

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub db: MemoryDatabase,
    pub infos: Vec<EventModelInfo>,
    /// Path for Tantivy index files
    pub index_path: PathBuf,
}

impl TestHarness {
    /// Create a harness with both log tables registered.
    pub fn new() -> Self {
        Self::with_model(event_model())
    }

    /// Create a harness capturing changes with the given event model.
    pub fn with_model(infos: Vec<EventModelInfo>) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index_path = temp_dir.path().join("index");
        let db = MemoryDatabase::new();
        for info in &infos {
            db.register_log_table(info);
        }
        Self {
            _temp_dir: temp_dir,
            db,
            infos,
            index_path,
        }
    }

    /// A stopped update source over the harness log tables. The poll
    /// interval is short so background tests finish quickly.
    pub fn source(&self, delivery_batch_size: usize, page_size: usize) -> UpdateSource {
        let config = SourceConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_delivery_batch_size(delivery_batch_size)
            .with_page_size(page_size);
        UpdateSource::new(Arc::new(self.db.clone()), self.infos.clone(), config)
            .expect("Failed to create update source")
    }

    pub fn provider(&self) -> Arc<DatabaseEntityProvider> {
        Arc::new(DatabaseEntityProvider::new(self.db.clone()))
    }

    pub fn insert_place(&self, id: i64, name: &str) {
        self.db.insert_original(PLACE_TABLE, place_row(id, name));
    }

    pub fn update_place(&self, id: i64, name: &str) {
        assert!(self.db.update_original(PLACE_TABLE, "id", place_row(id, name)));
    }

    pub fn delete_place(&self, id: i64) {
        assert!(self.db.delete_original(PLACE_TABLE, "id", &ColumnValue::Int(id)));
    }

    pub fn insert_sorcerer(&self, id: i64, name: &str, place_id: Option<i64>) {
        self.db
            .insert_original(SORCERER_TABLE, sorcerer_row(id, name, place_id));
    }

    pub fn update_sorcerer(&self, id: i64, name: &str, place_id: Option<i64>) {
        assert!(self
            .db
            .update_original(SORCERER_TABLE, "id", sorcerer_row(id, name, place_id)));
    }

    pub fn delete_sorcerer(&self, id: i64) {
        assert!(self.db.delete_original(SORCERER_TABLE, "id", &ColumnValue::Int(id)));
    }

    /// Rows still waiting in a log table.
    pub fn pending_log_rows(&self, log_table: &str) -> usize {
        self.db.rows(log_table).len()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Event model of the harness tables.
pub fn event_model() -> Vec<EventModelInfo> {
    vec![
        EventModelInfo::builder(PLACE_LOG, PLACE_TABLE)
            .id_info(
                IdInfo::new(
                    "Place",
                    vec!["place_id".into()],
                    vec!["id".into()],
                    IdBridge::integer(),
                )
                .expect("valid place id info"),
            )
            .build()
            .expect("valid place log table"),
        EventModelInfo::builder(SORCERER_LOG, SORCERER_TABLE)
            .id_info(
                IdInfo::new(
                    "Sorcerer",
                    vec!["sorcerer_id".into()],
                    vec!["id".into()],
                    IdBridge::integer(),
                )
                .expect("valid sorcerer id info"),
            )
            .build()
            .expect("valid sorcerer log table"),
    ]
}

/// Event model where the sorcerer log also records the referenced place.
/// `place_id` is nullable, so some sorcerer rows reference no place.
pub fn event_model_with_place_reference() -> Vec<EventModelInfo> {
    let mut infos = event_model();
    infos[1] = EventModelInfo::builder(SORCERER_LOG, SORCERER_TABLE)
        .id_info(
            IdInfo::new(
                "Sorcerer",
                vec!["sorcerer_id".into()],
                vec!["id".into()],
                IdBridge::integer(),
            )
            .expect("valid sorcerer id info"),
        )
        .id_info(
            IdInfo::single("Place", "place_id", IdBridge::integer())
                .expect("valid place reference id info"),
        )
        .build()
        .expect("valid sorcerer log table");
    infos
}

/// Index roots of the harness: `Place`, and `Sorcerer` embedding `Place`.
pub fn index_metadata() -> IndexMetadata {
    IndexMetadata::builder()
        .root(IndexRootMetadata::new("Place"))
        .root(IndexRootMetadata::new("Sorcerer").embeds("Place", "place_id", FieldKind::Numeric))
        .build()
        .expect("valid index metadata")
}

fn place_row(id: i64, name: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), ColumnValue::Int(id));
    row.insert("name".into(), ColumnValue::Text(name.to_string()));
    row
}

fn sorcerer_row(id: i64, name: &str, place_id: Option<i64>) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), ColumnValue::Int(id));
    row.insert("name".into(), ColumnValue::Text(name.to_string()));
    row.insert(
        "place_id".into(),
        place_id.map(ColumnValue::Int).unwrap_or(ColumnValue::Null),
    );
    row
}

/// Builds index documents from the harness tables and records every load.
pub struct DatabaseEntityProvider {
    db: MemoryDatabase,
    loads: Mutex<Vec<(String, EntityId)>>,
}

impl DatabaseEntityProvider {
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            db,
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn loads(&self) -> Vec<(String, EntityId)> {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn text(row: &Row, column: &str) -> Option<String> {
        row.get(column).and_then(ColumnValue::as_text)
    }
}

#[async_trait]
impl EntityProvider for DatabaseEntityProvider {
    async fn load(
        &self,
        root_type: &str,
        id: &EntityId,
    ) -> Result<Option<IndexDocument>, IndexError> {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((root_type.to_string(), id.clone()));
        let key = id
            .as_i64()
            .map(ColumnValue::Int)
            .ok_or_else(|| IndexError::Provider(format!("non-numeric id {}", id)))?;

        match root_type {
            "Place" => Ok(self.db.find(PLACE_TABLE, "id", &key).map(|row| {
                let doc = IndexDocument::new("Place", id.clone());
                match Self::text(&row, "name") {
                    Some(name) => doc.field("name", name),
                    None => doc,
                }
            })),
            "Sorcerer" => {
                let Some(row) = self.db.find(SORCERER_TABLE, "id", &key) else {
                    return Ok(None);
                };
                let mut doc = IndexDocument::new("Sorcerer", id.clone());
                if let Some(name) = Self::text(&row, "name") {
                    doc = doc.field("name", name);
                }
                if let Some(place_id) = row.get("place_id").and_then(ColumnValue::as_i64) {
                    if let Some(place) = self.db.find(PLACE_TABLE, "id", &ColumnValue::Int(place_id)) {
                        doc = doc.embed("place_id", EntityId::Int(place_id));
                        if let Some(place_name) = Self::text(&place, "name") {
                            doc = doc.field("place_name", place_name);
                        }
                    }
                }
                Ok(Some(doc))
            }
            other => Err(IndexError::Provider(format!("unknown root type {}", other))),
        }
    }
}

/// Consumer that records every batch it receives and can be told to fail.
pub struct RecordingConsumer {
    name: String,
    batches: Mutex<Vec<Vec<ChangeEvent>>>,
    failures: AtomicUsize,
}

impl RecordingConsumer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            batches: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` deliveries. Failed batches are still recorded.
    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<ChangeEvent>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl UpdateConsumer for RecordingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_event(&self, events: &[ChangeEvent]) -> Result<(), ConsumerError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(events.to_vec());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(format!("{} rejected the batch", self.name).into());
        }
        Ok(())
    }
}

/// Shorthand for an expected change event.
pub fn change(class: &str, id: i64, event_type: dbsync_types::EventType) -> ChangeEvent {
    ChangeEvent::new(class, EntityId::Int(id), event_type)
}
