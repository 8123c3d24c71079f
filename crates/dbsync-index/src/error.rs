//! Index error types.

use thiserror::Error;

/// Errors raised by index engines, entity providers and the apply consumer.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// Query parse error
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document body could not be encoded or decoded
    #[error("Document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Index writer lock poisoned or held
    #[error("Index is locked: {0}")]
    IndexLocked(String),

    /// Index metadata is inconsistent
    #[error("Index metadata error: {0}")]
    Metadata(String),

    /// An id cannot be rendered with the field's comparison type
    #[error("Field {field} compares numerically but id {id} is not numeric")]
    FieldType { field: String, id: String },

    /// Entity provider failure
    #[error("Entity provider error: {0}")]
    Provider(String),

    /// Engine-specific failure
    #[error("Index engine error: {0}")]
    Engine(String),
}

impl IndexError {
    /// Whether the error stems from configuration rather than runtime I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            IndexError::Metadata(_) | IndexError::FieldType { .. } | IndexError::SchemaMismatch(_)
        )
    }
}
