//! Foundation types for Stacks.
//!
//! This crate provides the record, identity, and time types shared by every
//! other Stacks crate. Records are plain serde structs whose camelCase field
//! layout matches the documents held by the record store.
//!
//! # Key Types
//!
//! - [`BookId`], [`MemberId`], [`TransactionId`]: opaque store-assigned keys
//! - [`Book`]: catalog entry with copy counters
//! - [`Member`]: borrower with status, expiry, and fine balances
//! - [`Transaction`]: one checkout and its lifecycle
//! - [`Clock`]: injectable source of "now"

pub mod book;
pub mod clock;
pub mod error;
pub mod id;
pub mod member;
pub mod record;
pub mod transaction;

pub use book::{Book, BookStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TypeError;
pub use id::{generate_key, BookId, MemberId, TransactionId};
pub use member::{Member, MemberStatus, MemberType};
pub use record::{Fields, Record};
pub use transaction::{Transaction, TransactionStatus};

/// Monetary amount in whole currency units.
pub type Amount = i64;
