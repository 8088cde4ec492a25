//! Error types for catalog operations.

use stacks_store::StoreError;
use stacks_types::{BookId, MemberId};
use thiserror::Error;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No book is stored under this key.
    #[error("book not found: {0}")]
    BookNotFound(BookId),

    /// No member is stored under this key.
    #[error("member not found: {0}")]
    MemberNotFound(MemberId),

    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Registration with an email that is already taken.
    #[error("a member with email {0} already exists")]
    DuplicateEmail(String),

    /// Deletion blocked by open checkouts.
    #[error("{entity} {id} has {count} active transaction(s)")]
    HasActiveTransactions {
        entity: &'static str,
        id: String,
        count: usize,
    },

    /// A concurrent writer changed the record between read and write.
    #[error("concurrent update on {0}; nothing was written")]
    Conflict(String),

    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CatalogError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
