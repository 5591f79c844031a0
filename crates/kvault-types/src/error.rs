use thiserror::Error;

/// Errors produced while constructing or converting kvault types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid namespace id {id:?}: {reason}")]
    InvalidNamespace { id: String, reason: String },

    #[error("invalid digest {digest:?}: {reason}")]
    InvalidDigest { digest: String, reason: String },

    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },

    #[error("value type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
