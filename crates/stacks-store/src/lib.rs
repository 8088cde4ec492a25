//! Keyed document storage for Stacks.
//!
//! The store is modeled on a hosted realtime database: documents live under
//! `library/<collection>/<key>`, fields are addressed by path, and the server
//! owns timestamps and counter increments. There are no multi-key
//! transactions beyond a single multi-path write.
//!
//! # Operations
//!
//! - Key access: [`RecordStore::get`], [`RecordStore::put`],
//!   [`RecordStore::append`], [`RecordStore::update`], [`RecordStore::delete`]
//! - Secondary lookups: [`RecordStore::query_eq`], [`RecordStore::scan`]
//! - Atomic writes: [`RecordStore::update_paths`] (all-or-nothing across
//!   paths), [`RecordStore::increment`] (store-side add),
//!   [`RecordStore::guarded_update`] (multi-path write applied only if every
//!   [`Guard`] holds)
//!
//! # Storage Backends
//!
//! - [`InMemoryRecordStore`] -- `BTreeMap`-based store for tests, embedding,
//!   and JSON snapshot files, with fault injection

pub mod error;
pub mod memory;
pub mod path;
pub mod traits;
pub mod typed;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryRecordStore, StoreOp};
pub use path::{server_value, Collection, FieldPath, FieldWrite, Guard, PathWrite, WriteOutcome};
pub use traits::RecordStore;
