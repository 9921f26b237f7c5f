//! Error types for the event store subsystem.

use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Requested event was not found.
    #[error("event not found: {0}")]
    EventNotFound(i64),

    /// A query parameter could not be parsed.
    #[error("invalid query parameter `{param}`: {message}")]
    InvalidQuery {
        /// Name of the offending parameter.
        param: String,
        /// Why it was rejected.
        message: String,
    },

    /// Aggregation was requested over a field that cannot be counted.
    #[error("unknown aggregate field: {0}")]
    UnknownField(String),

    /// Invalid operation on the event store.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl EventStoreError {
    pub(crate) fn invalid_query(param: &str, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            param: param.to_owned(),
            message: message.into(),
        }
    }
}

/// Convenience type alias for event store results.
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = EventStoreError::EventNotFound(42);
        assert_eq!(err.to_string(), "event not found: 42");
    }

    #[test]
    fn invalid_query_display() {
        let err = EventStoreError::invalid_query("importance", "expected integer");
        assert_eq!(
            err.to_string(),
            "invalid query parameter `importance`: expected integer"
        );
    }

    #[test]
    fn unknown_field_display() {
        let err = EventStoreError::UnknownField("color".into());
        assert!(err.to_string().contains("color"));
    }
}
