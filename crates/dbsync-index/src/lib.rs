//! # dbsync-index
//!
//! Keeps a full-text index in sync with change events.
//!
//! - [`IndexApplyConsumer`]: turns change event batches into index mutations
//! - [`IndexMetadata`]: which root types contain which entity classes
//! - [`IndexEngine`] / [`IndexWork`]: the index contract, implemented by
//!   [`TantivyIndexEngine`] and [`MemoryIndexEngine`]
//! - [`EntityProvider`]: loads the current state of root entities

pub mod consumer;
pub mod document;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod schema;
pub mod tantivy_engine;

pub use consumer::{ApplyStats, IndexApplyConsumer, DEFAULT_CASCADE_PAGE_SIZE};
pub use document::{document_key, reference_term, FieldCondition, IndexDocument};
pub use engine::{EntityProvider, IndexEngine, IndexWork};
pub use error::IndexError;
pub use memory::{IndexOperation, MemoryEntityStore, MemoryIndexEngine};
pub use metadata::{EmbeddedField, FieldKind, IndexMetadata, IndexMetadataBuilder, IndexRootMetadata};
pub use schema::{build_sync_schema, SyncSchema};
pub use tantivy_engine::{TantivyEngineConfig, TantivyIndexEngine, DEFAULT_WRITER_MEMORY_MB};
