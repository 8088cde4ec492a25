//! Typed access on top of [`RecordStore`] documents.

use serde_json::Value;
use stacks_types::Record;

use crate::error::StoreResult;
use crate::path::Collection;
use crate::traits::RecordStore;

/// Load and decode one record.
pub async fn load<R: Record>(
    store: &dyn RecordStore,
    collection: Collection,
    key: &str,
) -> StoreResult<Option<R>> {
    match store.get(collection, key).await? {
        Some(fields) => Ok(Some(R::from_fields(key, fields)?)),
        None => Ok(None),
    }
}

/// Encode and append a record; returns the generated key.
pub async fn insert<R: Record + Sync>(
    store: &dyn RecordStore,
    collection: Collection,
    record: &R,
) -> StoreResult<String> {
    let fields = record.to_fields()?;
    store.append(collection, fields).await
}

/// Decode every record whose `field` equals `value`.
pub async fn query<R: Record>(
    store: &dyn RecordStore,
    collection: Collection,
    field: &str,
    value: &Value,
) -> StoreResult<Vec<R>> {
    store
        .query_eq(collection, field, value)
        .await?
        .into_iter()
        .map(|(key, fields)| R::from_fields(&key, fields).map_err(Into::into))
        .collect()
}

/// Decode a whole collection (or its newest `limit` records) in key order.
pub async fn scan<R: Record>(
    store: &dyn RecordStore,
    collection: Collection,
    limit: Option<usize>,
) -> StoreResult<Vec<R>> {
    store
        .scan(collection, limit)
        .await?
        .into_iter()
        .map(|(key, fields)| R::from_fields(&key, fields).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;
    use chrono::{Duration, TimeZone, Utc};
    use stacks_types::{BookId, MemberId, Transaction, TransactionStatus};

    #[tokio::test]
    async fn insert_then_load_restores_key() {
        let store = InMemoryRecordStore::new();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let tx = Transaction::open(
            BookId::from("b1"),
            MemberId::from("m1"),
            start,
            start + Duration::days(14),
        );

        let key = insert(&store, Collection::Transactions, &tx).await.unwrap();
        let loaded: Transaction = load(&store, Collection::Transactions, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id.as_str(), key);
        assert_eq!(loaded.status, TransactionStatus::Active);
        assert_eq!(loaded.due_date, start + Duration::days(14));

        let by_member: Vec<Transaction> = query(
            &store,
            Collection::Transactions,
            "memberId",
            &Value::from("m1"),
        )
        .await
        .unwrap();
        assert_eq!(by_member.len(), 1);

        let missing: Option<Transaction> = load(&store, Collection::Transactions, "nope")
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
