use thiserror::Error;

/// Result type for canon store operations.
pub type CanonStoreResult<T> = Result<T, CanonStoreError>;

/// Canon store errors.
#[derive(Debug, Error)]
pub enum CanonStoreError {
    #[error("canon item not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("backend error: {0}")]
    Backend(String),
}
