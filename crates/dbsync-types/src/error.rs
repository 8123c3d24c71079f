//! Error types shared by the domain types.

use thiserror::Error;

/// Errors raised while decoding or configuring shared types.
#[derive(Debug, Error)]
pub enum SyncTypesError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event type code outside the known range
    #[error("Unknown event type code: {0}")]
    UnknownEventType(i64),

    /// A column value had an unexpected shape
    #[error("Invalid column value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncTypesError::Config("bad poll interval".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad poll interval");

        let err = SyncTypesError::UnknownEventType(7);
        assert_eq!(err.to_string(), "Unknown event type code: 7");
    }
}
