//! Event store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors an event store can report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The query was outside what the store supports.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::InvalidQuery("limit must be at least 1".to_string());
        assert_eq!(err.to_string(), "invalid query: limit must be at least 1");
    }
}
