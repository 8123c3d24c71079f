//! Error types for the relational data-access layer.

use thiserror::Error;

/// Errors raised by a [`crate::Database`] or [`crate::Transaction`].
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl StorageError {
    /// DDL failure that an idempotent re-creation may ignore.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::TableNotFound("place_updates".to_string());
        assert_eq!(err.to_string(), "Table not found: place_updates");

        let err = StorageError::AlreadyExists("TRIGGER place_ins".to_string());
        assert!(err.is_already_exists());
        assert!(!StorageError::Query("boom".into()).is_already_exists());
    }
}
