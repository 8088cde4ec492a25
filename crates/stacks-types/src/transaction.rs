use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::{BookId, MemberId, TransactionId};
use crate::record::{decode_fields, Fields, Record};
use crate::Amount;

/// Document field names for transaction records.
pub mod field {
    pub const BOOK_ID: &str = "bookId";
    pub const MEMBER_ID: &str = "memberId";
    pub const CHECKOUT_DATE: &str = "checkoutDate";
    pub const DUE_DATE: &str = "dueDate";
    pub const RETURN_DATE: &str = "returnDate";
    pub const STATUS: &str = "status";
    pub const FINE_AMOUNT: &str = "fineAmount";
    pub const COUNTERS_APPLIED: &str = "countersApplied";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Stored lifecycle state of a checkout.
///
/// There is no overdue state: overdue is derived from `status` and the due
/// date at query time (see [`Transaction::is_overdue`]). Older documents that
/// carry a literal `"overdue"` status are read as [`TransactionStatus::Active`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[serde(alias = "overdue")]
    Active,
    Returned,
    Lost,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 3] = [Self::Active, Self::Returned, Self::Lost];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Returned => "returned",
            Self::Lost => "lost",
        }
    }

    /// Returned and lost transactions are closed for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Returned) | (Self::Active, Self::Lost)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overdue" => Ok(Self::Active),
            _ => Self::ALL
                .into_iter()
                .find(|status| status.as_str() == s)
                .ok_or_else(|| TypeError::UnknownVariant {
                    kind: "transaction status",
                    value: s.to_string(),
                }),
        }
    }
}

/// One checkout of one book by one member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(skip)]
    pub id: TransactionId,
    pub book_id: BookId,
    pub member_id: MemberId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub checkout_date: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub due_date: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub return_date: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub fine_amount: Amount,
    /// Status whose book/member counter effects have been written.
    /// `None` until the checkout counters land. Documents written before the
    /// marker existed have no such field and load as settled for their
    /// stored status (see [`Record::from_fields`]).
    #[serde(default)]
    pub counters_applied: Option<TransactionStatus>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// A fresh active checkout with no counters applied yet.
    pub fn open(
        book_id: BookId,
        member_id: MemberId,
        checkout_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::default(),
            book_id,
            member_id,
            checkout_date,
            due_date,
            return_date: None,
            status: TransactionStatus::Active,
            fine_amount: 0,
            counters_applied: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Active and past its due date at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Active && self.due_date < now
    }

    /// Whether the stored counters lag behind the stored status.
    pub fn counters_pending(&self) -> bool {
        self.counters_applied != Some(self.status)
    }
}

impl Record for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &TransactionId {
        &self.id
    }

    fn set_id(&mut self, id: TransactionId) {
        self.id = id;
    }

    fn from_fields(key: &str, fields: Fields) -> Result<Self, TypeError> {
        let marker_stored = fields.contains_key(field::COUNTERS_APPLIED);
        let mut tx: Self = decode_fields(key, fields)?;
        if !marker_stored {
            tx.counters_applied = Some(tx.status);
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn sample() -> Transaction {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Transaction::open(
            BookId::from("b1"),
            MemberId::from("m1"),
            start,
            start + Duration::days(14),
        )
    }

    #[test]
    fn only_active_transitions_out() {
        use TransactionStatus::*;
        assert!(Active.can_transition_to(Returned));
        assert!(Active.can_transition_to(Lost));
        assert!(!Active.can_transition_to(Active));
        for terminal in [Returned, Lost] {
            assert!(terminal.is_terminal());
            for next in TransactionStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn overdue_is_derived() {
        let mut tx = sample();
        let due = tx.due_date;
        assert!(!tx.is_overdue(due));
        assert!(tx.is_overdue(due + Duration::milliseconds(1)));

        tx.status = TransactionStatus::Returned;
        assert!(!tx.is_overdue(due + Duration::days(100)));
    }

    #[test]
    fn legacy_overdue_status_reads_as_active() {
        let doc = json!({
            "bookId": "b1",
            "memberId": "m1",
            "checkoutDate": 1_700_000_000_000i64,
            "dueDate": 1_701_209_600_000i64,
            "returnDate": null,
            "status": "overdue",
            "fineAmount": 0
        });
        let tx = Transaction::from_fields("t1", doc.as_object().unwrap().clone()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Active);
        assert_eq!("overdue".parse::<TransactionStatus>().unwrap(), TransactionStatus::Active);
    }

    #[test]
    fn missing_marker_reads_as_settled() {
        let doc = json!({
            "bookId": "b1",
            "memberId": "m1",
            "checkoutDate": 1_700_000_000_000i64,
            "dueDate": 1_701_209_600_000i64,
            "returnDate": 1_701_900_000_000i64,
            "status": "returned",
            "fineAmount": 30
        });
        let tx = Transaction::from_fields("t0", doc.as_object().unwrap().clone()).unwrap();
        assert_eq!(tx.counters_applied, Some(TransactionStatus::Returned));
        assert!(!tx.counters_pending());

        let mut pending = doc.as_object().unwrap().clone();
        pending.insert(field::STATUS.into(), json!("active"));
        pending.insert(field::COUNTERS_APPLIED.into(), serde_json::Value::Null);
        let tx = Transaction::from_fields("t1", pending).unwrap();
        assert_eq!(tx.counters_applied, None);
        assert!(tx.counters_pending());
    }

    #[test]
    fn open_transaction_serializes_null_return_date() {
        let fields = sample().to_fields().unwrap();
        assert_eq!(fields[field::RETURN_DATE], serde_json::Value::Null);
        assert_eq!(fields[field::STATUS], json!("active"));
        assert_eq!(fields[field::COUNTERS_APPLIED], serde_json::Value::Null);
        assert_eq!(fields[field::FINE_AMOUNT], json!(0));
    }
}
