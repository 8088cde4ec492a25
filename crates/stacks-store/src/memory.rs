use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use stacks_types::{generate_key, Clock, Fields, SystemClock};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::path::{
    server_value, Collection, FieldPath, FieldWrite, Guard, PathWrite, WriteOutcome, ROOT,
};
use crate::traits::RecordStore;

/// Store operations that can be targeted by injected faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
    Append,
    Delete,
    Query,
    Scan,
    UpdatePaths,
    Increment,
    GuardedUpdate,
}

#[derive(Debug)]
struct PendingFault {
    op: StoreOp,
    skip: usize,
}

type Documents = HashMap<Collection, BTreeMap<String, Fields>>;

/// In-memory, `BTreeMap`-based record store.
///
/// Intended for tests, embedding, and the operator CLI (via JSON snapshots).
/// All documents are held behind a `RwLock`; every multi-path write is staged
/// on copies and committed under a single write lock, so it is atomic with
/// respect to every other operation.
pub struct InMemoryRecordStore {
    documents: RwLock<Documents>,
    clock: Arc<dyn Clock>,
    faults: Mutex<Vec<PendingFault>>,
}

impl InMemoryRecordStore {
    /// Create an empty store stamped by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store whose server timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            clock,
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Make one future call of `op` fail with [`StoreError::Unavailable`],
    /// after letting `skip` calls of that op through.
    pub fn inject_fault(&self, op: StoreOp, skip: usize) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PendingFault { op, skip });
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.read_lock()
            .map(|docs| docs.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Returns `true` if no collection holds any document.
    pub fn is_empty(&self) -> bool {
        Collection::ALL.iter().all(|c| self.len(*c) == 0)
    }

    /// Export every collection as `{"library": {"<collection>": {key: doc}}}`.
    pub fn snapshot(&self) -> StoreResult<Value> {
        let docs = self.read_lock()?;
        let mut library = serde_json::Map::new();
        for collection in Collection::ALL {
            let entries: serde_json::Map<String, Value> = docs
                .get(&collection)
                .map(|c| {
                    c.iter()
                        .map(|(k, v)| (k.clone(), Value::Object(v.clone())))
                        .collect()
                })
                .unwrap_or_default();
            library.insert(collection.as_str().to_string(), Value::Object(entries));
        }
        let mut root = serde_json::Map::new();
        root.insert(ROOT.to_string(), Value::Object(library));
        Ok(Value::Object(root))
    }

    /// Build a store from a snapshot produced by [`snapshot`](Self::snapshot).
    ///
    /// Unknown collections (e.g. admin records) are skipped.
    pub fn from_snapshot(snapshot: &Value, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let library = snapshot
            .get(ROOT)
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::Serialization(format!("snapshot missing '{ROOT}' root")))?;

        let mut documents: Documents = HashMap::new();
        for (name, entries) in library {
            let Some(collection) = Collection::from_name(name) else {
                debug!(collection = %name, "skipping unknown snapshot collection");
                continue;
            };
            let entries = entries.as_object().ok_or_else(|| {
                StoreError::Serialization(format!("collection {name} is not an object"))
            })?;
            let target = documents.entry(collection).or_default();
            for (key, doc) in entries {
                let Value::Object(fields) = doc else {
                    return Err(StoreError::Serialization(format!(
                        "{collection}/{key} is not an object"
                    )));
                };
                target.insert(key.clone(), fields.clone());
            }
        }

        Ok(Self {
            documents: RwLock::new(documents),
            clock,
            faults: Mutex::new(Vec::new()),
        })
    }

    /// Load a JSON snapshot file.
    pub fn load_json(path: &Path, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: Value = serde_json::from_slice(&bytes)?;
        let store = Self::from_snapshot(&snapshot, clock)?;
        debug!(path = %path.display(), "loaded snapshot");
        Ok(store)
    }

    /// Write a JSON snapshot file, replacing it atomically.
    pub fn save_json(&self, path: &Path) -> StoreResult<()> {
        let snapshot = self.snapshot()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &snapshot)?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        debug!(path = %path.display(), "saved snapshot");
        Ok(())
    }

    fn read_lock(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Documents>> {
        self.documents
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write_lock(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Documents>> {
        self.documents
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn check_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let Some(index) = faults.iter().position(|f| f.op == op) else {
            return Ok(());
        };
        if faults[index].skip > 0 {
            faults[index].skip -= 1;
            return Ok(());
        }
        faults.remove(index);
        warn!(?op, "injected store fault");
        Err(StoreError::Unavailable(format!("injected fault on {op:?}")))
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn resolve_server_values(&self, fields: &mut Fields) {
        let now = self.now_ms();
        for value in fields.values_mut() {
            if server_value::is_timestamp(value) {
                *value = Value::from(now);
            }
        }
    }

    /// Stage every write on copies of the touched documents, then commit.
    fn apply_writes(&self, docs: &mut Documents, writes: &[PathWrite]) -> StoreResult<()> {
        let now = self.now_ms();
        let mut staged: HashMap<(Collection, String), Fields> = HashMap::new();

        for PathWrite { path, write } in writes {
            validate_field_path(path)?;
            let slot = (path.collection, path.key.clone());
            if !staged.contains_key(&slot) {
                let current = docs
                    .get(&path.collection)
                    .and_then(|c| c.get(&path.key))
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound {
                        collection: path.collection,
                        key: path.key.clone(),
                    })?;
                staged.insert(slot.clone(), current);
            }
            let doc = staged
                .get_mut(&slot)
                .ok_or_else(|| StoreError::Unavailable("staging slot vanished".into()))?;
            apply_field_write(doc, path, write, now)?;
        }

        for ((collection, key), doc) in staged {
            docs.entry(collection).or_default().insert(key, doc);
        }
        Ok(())
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("books", &self.len(Collection::Books))
            .field("members", &self.len(Collection::Members))
            .field("transactions", &self.len(Collection::Transactions))
            .finish()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Fields>> {
        self.check_fault(StoreOp::Get)?;
        let docs = self.read_lock()?;
        Ok(docs.get(&collection).and_then(|c| c.get(key)).cloned())
    }

    async fn put(&self, collection: Collection, key: &str, mut fields: Fields) -> StoreResult<()> {
        self.check_fault(StoreOp::Put)?;
        validate_key(key)?;
        self.resolve_server_values(&mut fields);
        let mut docs = self.write_lock()?;
        docs.entry(collection).or_default().insert(key.to_string(), fields);
        debug!(%collection, key, "put");
        Ok(())
    }

    async fn append(&self, collection: Collection, mut fields: Fields) -> StoreResult<String> {
        self.check_fault(StoreOp::Append)?;
        self.resolve_server_values(&mut fields);
        let key = generate_key();
        let mut docs = self.write_lock()?;
        docs.entry(collection).or_default().insert(key.clone(), fields);
        debug!(%collection, key = %key, "append");
        Ok(key)
    }

    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<bool> {
        self.check_fault(StoreOp::Delete)?;
        let mut docs = self.write_lock()?;
        let existed = docs
            .get_mut(&collection)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false);
        debug!(%collection, key, existed, "delete");
        Ok(existed)
    }

    async fn query_eq(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<(String, Fields)>> {
        self.check_fault(StoreOp::Query)?;
        let docs = self.read_lock()?;
        let matches = docs
            .get(&collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, doc)| doc.get(field).unwrap_or(&Value::Null) == value)
                    .map(|(k, doc)| (k.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(matches)
    }

    async fn scan(
        &self,
        collection: Collection,
        limit: Option<usize>,
    ) -> StoreResult<Vec<(String, Fields)>> {
        self.check_fault(StoreOp::Scan)?;
        let docs = self.read_lock()?;
        let Some(c) = docs.get(&collection) else {
            return Ok(Vec::new());
        };
        let skip = limit.map_or(0, |n| c.len().saturating_sub(n));
        Ok(c.iter()
            .skip(skip)
            .map(|(k, doc)| (k.clone(), doc.clone()))
            .collect())
    }

    async fn update_paths(&self, writes: &[PathWrite]) -> StoreResult<()> {
        self.check_fault(StoreOp::UpdatePaths)?;
        let mut docs = self.write_lock()?;
        self.apply_writes(&mut docs, writes)?;
        debug!(count = writes.len(), "multi-path update");
        Ok(())
    }

    async fn increment(&self, path: &FieldPath, delta: i64) -> StoreResult<i64> {
        self.check_fault(StoreOp::Increment)?;
        let mut docs = self.write_lock()?;
        self.apply_writes(&mut docs, &[PathWrite::increment(path.clone(), delta)])?;
        let value = docs
            .get(&path.collection)
            .and_then(|c| c.get(&path.key))
            .and_then(|doc| doc.get(&path.field))
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::TypeMismatch {
                path: path.to_string(),
                reason: "increment did not produce an integer".into(),
            })?;
        debug!(%path, delta, value, "increment");
        Ok(value)
    }

    async fn guarded_update(
        &self,
        guards: &[Guard],
        writes: &[PathWrite],
    ) -> StoreResult<WriteOutcome> {
        self.check_fault(StoreOp::GuardedUpdate)?;
        let mut docs = self.write_lock()?;

        for guard in guards {
            let path = guard.path();
            let doc = docs.get(&path.collection).and_then(|c| c.get(&path.key));
            let actual = doc
                .and_then(|d| d.get(&path.field))
                .cloned()
                .unwrap_or(Value::Null);
            let holds = doc.is_some()
                && match guard {
                    Guard::Equals { value, .. } => &actual == value,
                    Guard::AtLeast { min, .. } => integer_or_zero(&actual).is_some_and(|v| v >= *min),
                };
            if !holds {
                debug!(%guard, %actual, "guard rejected write");
                return Ok(WriteOutcome::Rejected {
                    guard: guard.clone(),
                    actual,
                });
            }
        }

        self.apply_writes(&mut docs, writes)?;
        debug!(guards = guards.len(), writes = writes.len(), "guarded update applied");
        Ok(WriteOutcome::Applied)
    }
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.contains('/') {
        return Err(StoreError::InvalidPath(format!("bad key {key:?}")));
    }
    Ok(())
}

fn validate_field_path(path: &FieldPath) -> StoreResult<()> {
    validate_key(&path.key)?;
    if path.field.is_empty() || path.field.contains('/') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn integer_or_zero(value: &Value) -> Option<i64> {
    match value {
        Value::Null => Some(0),
        other => other.as_i64(),
    }
}

fn apply_field_write(
    doc: &mut Fields,
    path: &FieldPath,
    write: &FieldWrite,
    now_ms: i64,
) -> StoreResult<()> {
    let value = match write {
        FieldWrite::Set(value) if server_value::is_timestamp(value) => Value::from(now_ms),
        FieldWrite::Set(value) => value.clone(),
        FieldWrite::ServerTimestamp => Value::from(now_ms),
        FieldWrite::Increment(delta) => {
            let current = doc.get(&path.field).unwrap_or(&Value::Null);
            let current = integer_or_zero(current).ok_or_else(|| StoreError::TypeMismatch {
                path: path.to_string(),
                reason: format!("cannot increment non-integer value {current}"),
            })?;
            let next = current
                .checked_add(*delta)
                .ok_or_else(|| StoreError::TypeMismatch {
                    path: path.to_string(),
                    reason: "integer overflow".into(),
                })?;
            Value::from(next)
        }
    };
    doc.insert(path.field.clone(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use stacks_types::ManualClock;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn pinned_store() -> InMemoryRecordStore {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        InMemoryRecordStore::with_clock(Arc::new(clock))
    }

    fn book_path(key: &str, field: &str) -> FieldPath {
        FieldPath::new(Collection::Books, key, field)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryRecordStore::new();
        store
            .put(Collection::Books, "b1", fields(json!({"copies": 2})))
            .await
            .unwrap();
        let doc = store.get(Collection::Books, "b1").await.unwrap().unwrap();
        assert_eq!(doc["copies"], json!(2));
        assert!(store.exists(Collection::Books, "b1").await.unwrap());

        assert!(store.delete(Collection::Books, "b1").await.unwrap());
        assert!(!store.delete(Collection::Books, "b1").await.unwrap());
        assert!(store.get(Collection::Books, "b1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_keys_follow_insertion_order() {
        let store = InMemoryRecordStore::new();
        let mut keys = Vec::new();
        for i in 0..5 {
            keys.push(
                store
                    .append(Collection::Members, fields(json!({"n": i})))
                    .await
                    .unwrap(),
            );
        }
        let scanned: Vec<String> = store
            .scan(Collection::Members, None)
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(scanned, keys);

        let last_two = store.scan(Collection::Members, Some(2)).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].1["n"], json!(4));
    }

    #[tokio::test]
    async fn query_eq_filters_on_field() {
        let store = InMemoryRecordStore::new();
        store
            .put(Collection::Transactions, "t1", fields(json!({"memberId": "m1"})))
            .await
            .unwrap();
        store
            .put(Collection::Transactions, "t2", fields(json!({"memberId": "m2"})))
            .await
            .unwrap();
        let hits = store
            .query_eq(Collection::Transactions, "memberId", &json!("m1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "t1");
    }

    #[tokio::test]
    async fn multi_path_update_is_all_or_nothing() {
        let store = InMemoryRecordStore::new();
        store
            .put(Collection::Books, "b1", fields(json!({"availableCopies": 1})))
            .await
            .unwrap();

        let err = store
            .update_paths(&[
                PathWrite::increment(book_path("b1", "availableCopies"), -1),
                PathWrite::increment(FieldPath::new(Collection::Members, "ghost", "x"), 1),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let doc = store.get(Collection::Books, "b1").await.unwrap().unwrap();
        assert_eq!(doc["availableCopies"], json!(1));
    }

    #[tokio::test]
    async fn increment_treats_missing_field_as_zero() {
        let store = InMemoryRecordStore::new();
        store
            .put(Collection::Members, "m1", fields(json!({})))
            .await
            .unwrap();
        let path = FieldPath::new(Collection::Members, "m1", "totalFines");
        assert_eq!(store.increment(&path, 30).await.unwrap(), 30);
        assert_eq!(store.increment(&path, -10).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn increment_rejects_non_integer() {
        let store = InMemoryRecordStore::new();
        store
            .put(Collection::Books, "b1", fields(json!({"title": "Dune"})))
            .await
            .unwrap();
        let err = store.increment(&book_path("b1", "title"), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn guarded_update_checks_every_guard() {
        let store = InMemoryRecordStore::new();
        store
            .put(
                Collection::Books,
                "b1",
                fields(json!({"availableCopies": 1, "status": "available"})),
            )
            .await
            .unwrap();
        let decrement = [PathWrite::increment(book_path("b1", "availableCopies"), -1)];
        let guard = [Guard::at_least(book_path("b1", "availableCopies"), 1)];

        let first = store.guarded_update(&guard, &decrement).await.unwrap();
        assert!(first.is_applied());

        let second = store.guarded_update(&guard, &decrement).await.unwrap();
        match second {
            WriteOutcome::Rejected { actual, .. } => assert_eq!(actual, json!(0)),
            WriteOutcome::Applied => panic!("guard should have rejected"),
        }
        let doc = store.get(Collection::Books, "b1").await.unwrap().unwrap();
        assert_eq!(doc["availableCopies"], json!(0));
    }

    #[tokio::test]
    async fn guard_on_missing_document_never_holds() {
        let store = InMemoryRecordStore::new();
        let outcome = store
            .guarded_update(
                &[Guard::equals(book_path("nope", "status"), Value::Null)],
                &[],
            )
            .await
            .unwrap();
        assert!(!outcome.is_applied());
    }

    #[tokio::test]
    async fn server_timestamps_use_store_clock() {
        let store = pinned_store();
        let expected = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis();

        let key = store
            .append(
                Collection::Books,
                fields(json!({"createdAt": server_value::timestamp()})),
            )
            .await
            .unwrap();
        store
            .update(
                Collection::Books,
                &key,
                vec![("updatedAt".into(), FieldWrite::ServerTimestamp)],
            )
            .await
            .unwrap();

        let doc = store.get(Collection::Books, &key).await.unwrap().unwrap();
        assert_eq!(doc["createdAt"], json!(expected));
        assert_eq!(doc["updatedAt"], json!(expected));
    }

    #[tokio::test]
    async fn field_update_never_creates_documents() {
        let store = InMemoryRecordStore::new();
        let err = store
            .update(
                Collection::Members,
                "ghost",
                vec![("status".into(), FieldWrite::Set(json!("active")))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn injected_fault_hits_the_targeted_call() {
        let store = InMemoryRecordStore::new();
        store.inject_fault(StoreOp::Append, 1);

        store
            .append(Collection::Books, fields(json!({})))
            .await
            .unwrap();
        let err = store
            .append(Collection::Books, fields(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store
            .append(Collection::Books, fields(json!({})))
            .await
            .unwrap();
        assert_eq!(store.len(Collection::Books), 2);
    }

    #[tokio::test]
    async fn snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");

        let store = InMemoryRecordStore::new();
        store
            .put(Collection::Books, "b1", fields(json!({"copies": 3})))
            .await
            .unwrap();
        store
            .put(Collection::Members, "m1", fields(json!({"name": "Ada"})))
            .await
            .unwrap();
        store.save_json(&path).unwrap();

        let loaded = InMemoryRecordStore::load_json(&path, Arc::new(SystemClock)).unwrap();
        assert_eq!(loaded.len(Collection::Books), 1);
        assert_eq!(loaded.len(Collection::Members), 1);
        assert_eq!(loaded.len(Collection::Transactions), 0);
        let doc = loaded.get(Collection::Books, "b1").await.unwrap().unwrap();
        assert_eq!(doc["copies"], json!(3));
    }

    #[test]
    fn snapshot_skips_unknown_collections() {
        let snapshot = json!({
            "library": {
                "admins": {"a1": {"email": "admin@example.org"}},
                "books": {"b1": {"copies": 1}}
            }
        });
        let store = InMemoryRecordStore::from_snapshot(&snapshot, Arc::new(SystemClock)).unwrap();
        assert_eq!(store.len(Collection::Books), 1);
    }

    #[test]
    fn snapshot_requires_library_root() {
        let err = InMemoryRecordStore::from_snapshot(&json!({}), Arc::new(SystemClock)).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
