//! Book and member catalog for Stacks.
//!
//! The catalog owns book and member records. It validates and normalizes
//! input before it reaches the store, and it exposes the read accessors the
//! circulation engine uses to check eligibility.
//!
//! # Modules
//!
//! - [`error`]: [`CatalogError`]
//! - [`validate`]: field validation (required text, email, copy counts)
//! - [`books`]: book registration, updates, search, and status changes
//! - [`members`]: member registration, renewal, search, and status changes

pub mod books;
pub mod error;
pub mod members;
pub mod validate;

use std::sync::Arc;

use stacks_store::RecordStore;
use stacks_types::Clock;

pub use books::{BookSearchField, BookUpdate, NewBook};
pub use error::{CatalogError, CatalogResult};
pub use members::{MemberSearchField, MemberUpdate, NewMember};

/// Default page size for list operations.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Catalog service over a shared record store.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl Catalog {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The underlying store handle.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
