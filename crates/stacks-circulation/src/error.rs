//! Error types for circulation operations.

use std::fmt;

use stacks_catalog::CatalogError;
use stacks_store::StoreError;
use stacks_types::{Amount, MemberStatus, TransactionId, TransactionStatus};
use thiserror::Error;

/// The checkout precondition that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IneligibleReason {
    BookNotFound,
    NoAvailableCopies,
    MemberNotFound,
    MemberInactive(MemberStatus),
    OutstandingFines(Amount),
    MembershipExpired,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookNotFound => "book_not_found",
            Self::NoAvailableCopies => "no_available_copies",
            Self::MemberNotFound => "member_not_found",
            Self::MemberInactive(_) => "member_inactive",
            Self::OutstandingFines(_) => "outstanding_fines",
            Self::MembershipExpired => "membership_expired",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BookNotFound => f.write_str("book not found"),
            Self::NoAvailableCopies => f.write_str("no available copies of this book"),
            Self::MemberNotFound => f.write_str("member not found"),
            Self::MemberInactive(status) => write!(f, "member account is {status}"),
            Self::OutstandingFines(amount) => write!(f, "member has {amount} in outstanding fines"),
            Self::MembershipExpired => f.write_str("membership has expired"),
        }
    }
}

/// Errors from the circulation engine and reconciler.
#[derive(Debug, Error)]
pub enum CirculationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("checkout refused: {0}")]
    IneligibleCheckout(IneligibleReason),

    /// The transaction is not in the state the operation requires.
    #[error("transaction {id} is {actual}, expected {expected}")]
    InvalidTransactionState {
        id: TransactionId,
        actual: TransactionStatus,
        expected: TransactionStatus,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The transaction record was written but its counter effects were not.
    /// Running the reconciler applies them.
    #[error("transaction {transaction_id} recorded but counters not applied: {reason}")]
    PartialCommit {
        transaction_id: TransactionId,
        reason: String,
    },

    /// A guarded write lost a race; nothing was written.
    #[error("concurrent update: {0}")]
    Conflict(String),

    /// Stored counters already violate an invariant.
    #[error("inconsistent counters: {0}")]
    Inconsistent(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other store failure (bad document shape, snapshot I/O).
    #[error("store error: {0}")]
    Store(StoreError),
}

impl CirculationError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::IneligibleCheckout(_) => "ineligible_checkout",
            Self::InvalidTransactionState { .. } => "invalid_transaction_state",
            Self::Validation { .. } => "validation",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::PartialCommit { .. } => "partial_commit",
            Self::Conflict(_) => "conflict",
            Self::Inconsistent(_) => "inconsistent",
            Self::Config(_) => "config",
            Self::Store(_) => "store",
        }
    }

    /// Wrap a phase-two failure so the caller learns which record to repair.
    pub(crate) fn partial(transaction_id: &TransactionId, reason: impl fmt::Display) -> Self {
        Self::PartialCommit {
            transaction_id: transaction_id.clone(),
            reason: reason.to_string(),
        }
    }
}

impl From<StoreError> for CirculationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            StoreError::NotFound { collection, key } => Self::NotFound {
                entity: collection.as_str(),
                id: key,
            },
            other => Self::Store(other),
        }
    }
}

impl From<CatalogError> for CirculationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::BookNotFound(id) => Self::NotFound {
                entity: "book",
                id: id.to_string(),
            },
            CatalogError::MemberNotFound(id) => Self::NotFound {
                entity: "member",
                id: id.to_string(),
            },
            CatalogError::Validation { field, reason } => Self::Validation { field, reason },
            CatalogError::Conflict(what) => Self::Conflict(what),
            CatalogError::Store(e) => e.into(),
            other => Self::Validation {
                field: "catalog",
                reason: other.to_string(),
            },
        }
    }
}

/// Convenience type alias for circulation operations.
pub type CirculationResult<T> = std::result::Result<T, CirculationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stacks_store::Collection;

    #[test]
    fn store_errors_map_to_kinds() {
        let err: CirculationError = StoreError::Unavailable("timeout".into()).into();
        assert_eq!(err.kind(), "store_unavailable");

        let err: CirculationError = StoreError::NotFound {
            collection: Collection::Transactions,
            key: "t1".into(),
        }
        .into();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "transactions not found: t1");
    }

    #[test]
    fn ineligible_checkout_names_reason() {
        let err = CirculationError::IneligibleCheckout(IneligibleReason::OutstandingFines(30));
        assert_eq!(err.kind(), "ineligible_checkout");
        assert_eq!(
            err.to_string(),
            "checkout refused: member has 30 in outstanding fines"
        );
        assert_eq!(IneligibleReason::MembershipExpired.as_str(), "membership_expired");
    }

    #[test]
    fn partial_commit_carries_transaction() {
        let err = CirculationError::partial(&TransactionId::from("t9"), "store unavailable");
        assert_eq!(err.kind(), "partial_commit");
        assert!(err.to_string().contains("t9"));
    }
}
