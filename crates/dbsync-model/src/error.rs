//! Error types for event model construction and row decoding.

use dbsync_types::SyncTypesError;
use thiserror::Error;

/// Errors raised while building or using the event model.
///
/// Everything except the row-decoding variants is a configuration error:
/// it is raised before any trigger is generated and is never retried.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Log table {table}: no event type column declared")]
    MissingEventType { table: String },

    #[error("Log table {table}: more than one event type column declared ({members:?})")]
    DuplicateEventType { table: String, members: Vec<String> },

    #[error("Log table {table}: more than one update id column declared ({members:?})")]
    DuplicateUpdateId { table: String, members: Vec<String> },

    #[error("Log table {table}: no id info declared")]
    MissingIdInfo { table: String },

    #[error("Log table {table}: markers must all be declared on fields or all on accessors")]
    MixedMemberKinds { table: String },

    #[error("Log table {table}: member {member} declares both an id and an event type")]
    EventAndIdOnSameMember { table: String, member: String },

    #[error(
        "Id info for {entity_class}: {update_columns} update table columns but {original_columns} original columns"
    )]
    ArityMismatch {
        entity_class: String,
        update_columns: usize,
        original_columns: usize,
    },

    #[error("Id info for {entity_class}: {expected} columns but {actual} column types")]
    ColumnTypeArity {
        entity_class: String,
        expected: usize,
        actual: usize,
    },

    #[error("Id info for {entity_class} declares no columns")]
    NoColumns { entity_class: String },

    #[error("Unknown id bridge: {0}")]
    UnknownBridge(String),

    #[error("Duplicate update table: {0}")]
    DuplicateUpdateTable(String),

    #[error("Duplicate original table: {0}")]
    DuplicateOriginalTable(String),

    #[error(
        "Update table {update_table} (capturing {original_table}) is named like the original table captured by {clashes_with}"
    )]
    NamingConflict {
        update_table: String,
        original_table: String,
        /// Log table whose original table carries the same name
        clashes_with: String,
    },

    #[error("Log table {table}: column {column} is mapped inconsistently by several id infos")]
    ColumnConflict { table: String, column: String },

    #[error("Log table {table}: column {column} is reserved for the update id or event type")]
    ReservedColumn { table: String, column: String },

    #[error("Log table {table}: row has no column {column}")]
    MissingColumn { table: String, column: String },

    #[error("Bridge {bridge} failed: {message}")]
    Bridge { bridge: String, message: String },

    #[error("Log table {table}: expected an integer update id, got {value}")]
    InvalidUpdateId { table: String, value: String },

    #[error("Log table {table}: expected an integer event type, got {value}")]
    InvalidEventType { table: String, value: String },

    #[error("Invalid value: {0}")]
    Value(#[from] SyncTypesError),

    #[error("Declaration error: {0}")]
    Declaration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// Whether this error is a configuration problem rather than bad row data.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            ModelError::MissingColumn { .. }
                | ModelError::Bridge { .. }
                | ModelError::InvalidUpdateId { .. }
                | ModelError::InvalidEventType { .. }
                | ModelError::Value(_)
        )
    }
}
