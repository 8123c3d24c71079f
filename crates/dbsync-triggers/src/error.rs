//! Error types for trigger generation and setup.

use dbsync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Log table {table}: no mapped columns, refusing to generate a trigger")]
    NoColumns { table: String },

    #[error("Statement failed: {source} (sql: {sql})")]
    Statement {
        sql: String,
        #[source]
        source: StorageError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TriggerError::Statement {
            sql: "DROP TABLE x".to_string(),
            source: StorageError::Query("denied".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Statement failed: Query error: denied (sql: DROP TABLE x)"
        );
    }
}
