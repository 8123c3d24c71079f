//! Error types for the update source.

use dbsync_model::ModelError;
use dbsync_storage::StorageError;
use thiserror::Error;

/// Error returned by an [`crate::UpdateConsumer`].
pub type ConsumerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while polling update-log tables.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Operation not allowed in the current state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Update source is already running")]
    AlreadyRunning,

    /// Two log rows claim the same position in the merged order
    #[error("Ordering violation: {0}")]
    OrderingViolation(String),

    #[error("Invalid log row in {table}: {message}")]
    InvalidRow { table: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Consumer {consumer} failed: {source}")]
    Consumer {
        consumer: String,
        #[source]
        source: ConsumerError,
    },
}

impl SourceError {
    /// Whether the poller must stop instead of retrying on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::OrderingViolation(_))
    }
}
