use canon_ledger::LedgerError;
use canon_optr::OptrError;
use canon_promotion::PromotionError;
use canon_store::CanonStoreError;
use canon_types::TypesError;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// System faults. Gate denials are never errors; they are DENY responses.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tenant mismatch: caller is {caller}, request names {requested}")]
    TenantMismatch { caller: String, requested: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(what) => ServiceError::NotFound(what),
            LedgerError::Unavailable { .. }
            | LedgerError::Contention { .. }
            | LedgerError::PartialWrite { .. }
            | LedgerError::Backend(_) => ServiceError::Unavailable(e.to_string()),
            LedgerError::Conflict(_) | LedgerError::Serialization(_) | LedgerError::Hashing(_) => {
                ServiceError::Internal(e.to_string())
            }
        }
    }
}

impl From<CanonStoreError> for ServiceError {
    fn from(e: CanonStoreError) -> Self {
        match e {
            CanonStoreError::NotFound(id) => ServiceError::NotFound(format!("canon item {id}")),
            CanonStoreError::Conflict(_)
            | CanonStoreError::InvalidInput(_)
            | CanonStoreError::InvariantViolation(_) => ServiceError::Validation(e.to_string()),
            CanonStoreError::Backend(_) => ServiceError::Unavailable(e.to_string()),
        }
    }
}

impl From<OptrError> for ServiceError {
    fn from(e: OptrError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

impl From<PromotionError> for ServiceError {
    fn from(e: PromotionError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

impl From<TypesError> for ServiceError {
    fn from(e: TypesError) -> Self {
        match e {
            TypesError::OutOfRange { .. } => ServiceError::Validation(e.to_string()),
            TypesError::Encoding(_) => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Internal(format!("serialization: {e}"))
    }
}
