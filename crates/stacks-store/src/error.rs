use crate::path::Collection;

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed document does not exist.
    #[error("record not found: {collection}/{key}")]
    NotFound { collection: Collection, key: String },

    /// Transport failure, timeout, or an unreachable backend.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A field had a type the operation cannot work with (e.g. incrementing
    /// a string).
    #[error("type mismatch at {path}: {reason}")]
    TypeMismatch { path: String, reason: String },

    /// A key or field name that cannot be addressed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from a file-backed snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<stacks_types::TypeError> for StoreError {
    fn from(err: stacks_types::TypeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
