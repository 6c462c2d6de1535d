use canon_types::TypesError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which side of the dual write an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Fast,
    Durable,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Fast => f.write_str("fast store"),
            StoreKind::Durable => f.write_str("durable store"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{store} unavailable during {operation}")]
    Unavailable {
        store: StoreKind,
        operation: &'static str,
    },

    #[error("append to {pointer} lost the race {attempts} times")]
    Contention { pointer: String, attempts: u32 },

    #[error("event {pointer}#{seq} is durable but the fast store write failed: {reason}")]
    PartialWrite {
        pointer: String,
        seq: u64,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("hashing error: {0}")]
    Hashing(#[from] TypesError),

    #[error("backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    /// Errors that mean a backing store could not be reached in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LedgerError::Unavailable { .. })
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
