use thiserror::Error;

/// Result type for model-level operations.
pub type TypesResult<T> = Result<T, TypesError>;

/// Errors raised while constructing or hashing model values.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("value out of range: {field} = {value} (expected 0.0..=1.0)")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("canonical encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
