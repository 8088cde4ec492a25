use async_trait::async_trait;
use serde_json::Value;
use stacks_types::Fields;

use crate::error::StoreResult;
use crate::path::{Collection, FieldPath, FieldWrite, Guard, PathWrite, WriteOutcome};

/// Keyed document store.
///
/// All implementations must satisfy these invariants:
/// - A single-key write is atomic and durable once it returns `Ok`.
/// - [`update_paths`](Self::update_paths) and
///   [`guarded_update`](Self::guarded_update) apply all writes or none, even
///   when they span several documents. No other multi-key atomicity exists.
/// - Field-level writes never create documents; they fail with
///   [`StoreError::NotFound`](crate::StoreError::NotFound) instead.
/// - `Increment` and `ServerTimestamp` are evaluated by the store at apply
///   time.
/// - Transport failures are surfaced as errors, never swallowed or retried.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a whole document. Returns `Ok(None)` if the key is absent.
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Fields>>;

    /// Create or replace a whole document at `key`.
    async fn put(&self, collection: Collection, key: &str, fields: Fields) -> StoreResult<()>;

    /// Insert a document under a store-generated key and return the key.
    /// Keys sort in insertion order.
    async fn append(&self, collection: Collection, fields: Fields) -> StoreResult<String>;

    /// Remove a document. Returns `true` if it existed.
    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<bool>;

    /// All documents whose `field` equals `value`, in key order.
    async fn query_eq(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<(String, Fields)>>;

    /// Documents in key order. With a limit, only the last `limit` keys
    /// (the most recently appended) are returned.
    async fn scan(
        &self,
        collection: Collection,
        limit: Option<usize>,
    ) -> StoreResult<Vec<(String, Fields)>>;

    /// Apply field writes across any number of documents atomically.
    async fn update_paths(&self, writes: &[PathWrite]) -> StoreResult<()>;

    /// Store-side add to an integer field; returns the new value.
    async fn increment(&self, path: &FieldPath, delta: i64) -> StoreResult<i64>;

    /// Apply `writes` atomically, but only if every guard holds at apply time.
    async fn guarded_update(
        &self,
        guards: &[Guard],
        writes: &[PathWrite],
    ) -> StoreResult<WriteOutcome>;

    /// Partial update of one document.
    ///
    /// Default implementation routes through `update_paths`.
    async fn update(
        &self,
        collection: Collection,
        key: &str,
        fields: Vec<(String, FieldWrite)>,
    ) -> StoreResult<()> {
        let writes: Vec<PathWrite> = fields
            .into_iter()
            .map(|(field, write)| PathWrite {
                path: FieldPath::new(collection, key, field),
                write,
            })
            .collect();
        self.update_paths(&writes).await
    }

    /// Check whether a document exists.
    async fn exists(&self, collection: Collection, key: &str) -> StoreResult<bool> {
        Ok(self.get(collection, key).await?.is_some())
    }
}
