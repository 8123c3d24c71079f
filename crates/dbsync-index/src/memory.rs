//! In-process index engine and entity store.
//!
//! `MemoryIndexEngine` keeps committed documents in a map and records every
//! call it receives, so callers can assert which mutations and lookups were
//! issued. `MemoryEntityStore` is a map-backed [`EntityProvider`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use dbsync_types::EntityId;

use crate::document::{FieldCondition, IndexDocument};
use crate::engine::{EntityProvider, IndexEngine, IndexWork};
use crate::error::IndexError;

/// One call received by a [`MemoryIndexEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOperation {
    AddOrReplace { root_type: String, id: EntityId },
    DeleteById { root_type: String, id: EntityId },
    Query { root_type: String, condition: FieldCondition },
    Commit,
    Rollback,
}

#[derive(Debug)]
enum Pending {
    Add(IndexDocument),
    Delete(String, EntityId),
}

#[derive(Debug, Default)]
struct MemoryIndexState {
    documents: BTreeMap<(String, EntityId), IndexDocument>,
    operations: Vec<IndexOperation>,
    failing_commits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryIndexEngine {
    state: Arc<Mutex<MemoryIndexState>>,
}

impl MemoryIndexEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryIndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn document(&self, root_type: &str, id: &EntityId) -> Option<IndexDocument> {
        self.lock()
            .documents
            .get(&(root_type.to_string(), id.clone()))
            .cloned()
    }

    /// Committed documents in key order.
    pub fn documents(&self) -> Vec<IndexDocument> {
        self.lock().documents.values().cloned().collect()
    }

    /// Store a document outside any unit of work, as another writer would.
    pub fn seed(&self, doc: IndexDocument) {
        self.lock()
            .documents
            .insert((doc.root_type.clone(), doc.id.clone()), doc);
    }

    pub fn operations(&self) -> Vec<IndexOperation> {
        self.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Make the next `times` commits fail.
    pub fn fail_next_commits(&self, times: usize) {
        self.lock().failing_commits = times;
    }
}

#[async_trait]
impl IndexEngine for MemoryIndexEngine {
    async fn begin(&self) -> Result<Box<dyn IndexWork>, IndexError> {
        Ok(Box::new(MemoryIndexWork {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }

    async fn query_ids(
        &self,
        root_type: &str,
        condition: &FieldCondition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EntityId>, IndexError> {
        let mut state = self.lock();
        state.operations.push(IndexOperation::Query {
            root_type: root_type.to_string(),
            condition: condition.clone(),
        });
        Ok(state
            .documents
            .values()
            .filter(|doc| doc.root_type == root_type)
            .filter(|doc| doc.references(&condition.field, &condition.value))
            .skip(offset)
            .take(limit)
            .map(|doc| doc.id.clone())
            .collect())
    }
}

struct MemoryIndexWork {
    state: Arc<Mutex<MemoryIndexState>>,
    pending: Vec<Pending>,
}

impl MemoryIndexWork {
    fn record(&self, operation: IndexOperation) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .operations
            .push(operation);
    }
}

#[async_trait]
impl IndexWork for MemoryIndexWork {
    async fn add_or_replace(&mut self, doc: IndexDocument) -> Result<(), IndexError> {
        self.record(IndexOperation::AddOrReplace {
            root_type: doc.root_type.clone(),
            id: doc.id.clone(),
        });
        self.pending.push(Pending::Add(doc));
        Ok(())
    }

    async fn delete_by_id(&mut self, root_type: &str, id: &EntityId) -> Result<(), IndexError> {
        self.record(IndexOperation::DeleteById {
            root_type: root_type.to_string(),
            id: id.clone(),
        });
        self.pending.push(Pending::Delete(root_type.to_string(), id.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexError> {
        let MemoryIndexWork { state, pending } = *self;
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(IndexError::Engine("injected commit failure".into()));
        }
        let applied = pending.len();
        for pending in pending {
            match pending {
                Pending::Add(doc) => {
                    state
                        .documents
                        .insert((doc.root_type.clone(), doc.id.clone()), doc);
                }
                Pending::Delete(root_type, id) => {
                    state.documents.remove(&(root_type, id));
                }
            }
        }
        state.operations.push(IndexOperation::Commit);
        debug!(applied, "Committed memory index work");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IndexError> {
        self.record(IndexOperation::Rollback);
        Ok(())
    }
}

/// Map-backed entity provider.
#[derive(Debug, Clone, Default)]
pub struct MemoryEntityStore {
    entities: Arc<Mutex<HashMap<(String, EntityId), IndexDocument>>>,
    failing_loads: Arc<Mutex<usize>>,
    /// Root type and id count of every batched load
    batch_loads: Arc<Mutex<Vec<(String, usize)>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, doc: IndexDocument) {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((doc.root_type.clone(), doc.id.clone()), doc);
    }

    pub fn remove(&self, root_type: &str, id: &EntityId) -> Option<IndexDocument> {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(root_type.to_string(), id.clone()))
    }

    /// Make the next `times` loads fail.
    pub fn fail_next_loads(&self, times: usize) {
        *self.failing_loads.lock().unwrap_or_else(PoisonError::into_inner) = times;
    }

    pub fn batch_loads(&self) -> Vec<(String, usize)> {
        self.batch_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EntityProvider for MemoryEntityStore {
    async fn load(
        &self,
        root_type: &str,
        id: &EntityId,
    ) -> Result<Option<IndexDocument>, IndexError> {
        {
            let mut failing = self.failing_loads.lock().unwrap_or_else(PoisonError::into_inner);
            if *failing > 0 {
                *failing -= 1;
                return Err(IndexError::Provider(format!(
                    "injected failure loading {}#{}",
                    root_type, id
                )));
            }
        }
        Ok(self
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(root_type.to_string(), id.clone()))
            .cloned())
    }

    async fn load_batch(
        &self,
        root_type: &str,
        ids: &[EntityId],
    ) -> Result<Vec<IndexDocument>, IndexError> {
        self.batch_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((root_type.to_string(), ids.len()));
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.load(root_type, id).await? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}
