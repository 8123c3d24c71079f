//! Contracts between the apply consumer, index engines and the entity
//! data-access layer.

use async_trait::async_trait;

use dbsync_types::EntityId;

use crate::document::{FieldCondition, IndexDocument};
use crate::error::IndexError;

/// A full-text index that stores one document per root entity.
///
/// Engines must tolerate other writers on the same index; the apply
/// consumer never assumes exclusive ownership.
#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// Start a unit of work. Engines without transactions return a work
    /// object that applies on commit and discards on rollback.
    async fn begin(&self) -> Result<Box<dyn IndexWork>, IndexError>;

    /// Ids of `root_type` documents matching `condition`, as seen by the
    /// last commit, paginated by `offset` and `limit`.
    async fn query_ids(
        &self,
        root_type: &str,
        condition: &FieldCondition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EntityId>, IndexError>;
}

/// Mutations scoped to one unit of work.
#[async_trait]
pub trait IndexWork: Send {
    /// Store `doc`, replacing any document with the same root type and id.
    async fn add_or_replace(&mut self, doc: IndexDocument) -> Result<(), IndexError>;

    async fn delete_by_id(&mut self, root_type: &str, id: &EntityId) -> Result<(), IndexError>;

    async fn commit(self: Box<Self>) -> Result<(), IndexError>;

    async fn rollback(self: Box<Self>) -> Result<(), IndexError>;
}

/// Loads the current state of root entities from the source of truth.
#[async_trait]
pub trait EntityProvider: Send + Sync {
    /// `None` when the entity no longer exists.
    async fn load(
        &self,
        root_type: &str,
        id: &EntityId,
    ) -> Result<Option<IndexDocument>, IndexError>;

    /// Load several entities, omitting those that no longer exist.
    async fn load_batch(
        &self,
        root_type: &str,
        ids: &[EntityId],
    ) -> Result<Vec<IndexDocument>, IndexError> {
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.load(root_type, id).await? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}
