//! Counter effects of a transaction on its book and member.
//!
//! Each status has a cumulative effect on the counters, measured from the
//! moment before checkout. The counters stored on a transaction's book and
//! member reflect the effects of its `countersApplied` marker; moving them to
//! reflect its current status means applying the difference and advancing
//! the marker in one guarded write. The guard on the marker makes the write
//! apply at most once no matter how many callers race to settle it.

use serde_json::Value;
use stacks_store::{Collection, FieldPath, Guard, PathWrite};
use stacks_types::book::field as book_field;
use stacks_types::member::field as member_field;
use stacks_types::transaction::field as tx_field;
use stacks_types::{Amount, Transaction, TransactionStatus};

/// Signed adjustments to book and member counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterEffects {
    pub available_copies: i64,
    pub copies: i64,
    pub books_checked_out: i64,
    pub current_fines: Amount,
    pub total_fines: Amount,
}

impl CounterEffects {
    /// Total effect of a transaction that has reached `status`, carrying
    /// `fine` if the status is terminal.
    pub fn cumulative(status: Option<TransactionStatus>, fine: Amount) -> Self {
        match status {
            None => Self::default(),
            Some(TransactionStatus::Active) => Self {
                available_copies: -1,
                books_checked_out: 1,
                ..Self::default()
            },
            Some(TransactionStatus::Returned) => Self {
                books_checked_out: 1,
                current_fines: fine,
                total_fines: fine,
                ..Self::default()
            },
            Some(TransactionStatus::Lost) => Self {
                available_copies: -2,
                copies: -1,
                books_checked_out: 1,
                current_fines: fine,
                total_fines: fine,
            },
        }
    }

    /// Effects still owed by `tx`: its status's total minus what its marker
    /// says has already been written.
    pub fn pending(tx: &Transaction) -> Self {
        let target = Self::cumulative(Some(tx.status), tx.fine_amount);
        let applied = Self::cumulative(tx.counters_applied, tx.fine_amount);
        target.minus(applied)
    }

    pub fn minus(self, other: Self) -> Self {
        Self {
            available_copies: self.available_copies - other.available_copies,
            copies: self.copies - other.copies,
            books_checked_out: self.books_checked_out - other.books_checked_out,
            current_fines: self.current_fines - other.current_fines,
            total_fines: self.total_fines - other.total_fines,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// The guarded multi-path write that settles a transaction's counters.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterUpdate {
    pub effects: CounterEffects,
    pub guards: Vec<Guard>,
    pub writes: Vec<PathWrite>,
}

impl CounterUpdate {
    /// Build the write moving `tx`'s counters from its marker to its status.
    ///
    /// Guards: the stored marker still matches `tx`, and no book counter it
    /// decrements would drop below zero.
    pub fn for_transaction(tx: &Transaction) -> Self {
        let effects = CounterEffects::pending(tx);
        let tx_path = |field: &str| FieldPath::new(Collection::Transactions, tx.id.as_str(), field);
        let book_path = |field: &str| FieldPath::new(Collection::Books, tx.book_id.as_str(), field);
        let member_path =
            |field: &str| FieldPath::new(Collection::Members, tx.member_id.as_str(), field);

        let marker = tx
            .counters_applied
            .map_or(Value::Null, |s| Value::from(s.as_str()));
        let mut guards = vec![Guard::equals(tx_path(tx_field::COUNTERS_APPLIED), marker)];
        if effects.available_copies < 0 {
            guards.push(Guard::at_least(
                book_path(book_field::AVAILABLE_COPIES),
                -effects.available_copies,
            ));
        }
        if effects.copies < 0 {
            guards.push(Guard::at_least(book_path(book_field::COPIES), -effects.copies));
        }

        let mut writes = Vec::new();
        let counters = [
            (book_path(book_field::AVAILABLE_COPIES), effects.available_copies),
            (book_path(book_field::COPIES), effects.copies),
            (
                member_path(member_field::TOTAL_BOOKS_CHECKED_OUT),
                effects.books_checked_out,
            ),
            (member_path(member_field::CURRENT_FINES), effects.current_fines),
            (member_path(member_field::TOTAL_FINES), effects.total_fines),
        ];
        for (path, delta) in counters {
            if delta != 0 {
                writes.push(PathWrite::increment(path, delta));
            }
        }
        writes.push(PathWrite::set(
            tx_path(tx_field::COUNTERS_APPLIED),
            tx.status.as_str(),
        ));
        writes.push(PathWrite::server_timestamp(tx_path(tx_field::UPDATED_AT)));

        Self {
            effects,
            guards,
            writes,
        }
    }

    /// Whether a rejected guard was the one protecting `availableCopies`.
    pub fn is_copy_guard(guard: &Guard) -> bool {
        let path = guard.path();
        path.collection == Collection::Books && path.field == book_field::AVAILABLE_COPIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use stacks_types::{BookId, MemberId, TransactionId};

    fn tx(status: TransactionStatus, applied: Option<TransactionStatus>, fine: Amount) -> Transaction {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut tx = Transaction::open(
            BookId::from("b1"),
            MemberId::from("m1"),
            start,
            start + Duration::days(14),
        );
        tx.id = TransactionId::from("t1");
        tx.status = status;
        tx.counters_applied = applied;
        tx.fine_amount = fine;
        tx
    }

    #[test]
    fn checkout_takes_a_copy_off_the_shelf() {
        let effects = CounterEffects::pending(&tx(TransactionStatus::Active, None, 0));
        assert_eq!(effects.available_copies, -1);
        assert_eq!(effects.books_checked_out, 1);
        assert_eq!(effects.current_fines, 0);
    }

    #[test]
    fn return_after_checkout_restores_copy_and_charges_fine() {
        let effects = CounterEffects::pending(&tx(
            TransactionStatus::Returned,
            Some(TransactionStatus::Active),
            30,
        ));
        assert_eq!(
            effects,
            CounterEffects {
                available_copies: 1,
                current_fines: 30,
                total_fines: 30,
                ..CounterEffects::default()
            }
        );
    }

    #[test]
    fn return_with_no_counters_applied_nets_out() {
        let effects = CounterEffects::pending(&tx(TransactionStatus::Returned, None, 0));
        assert_eq!(effects.available_copies, 0);
        assert_eq!(effects.books_checked_out, 1);
    }

    #[test]
    fn loss_removes_a_unit_from_both_counters() {
        let effects = CounterEffects::pending(&tx(
            TransactionStatus::Lost,
            Some(TransactionStatus::Active),
            1000,
        ));
        assert_eq!(effects.available_copies, -1);
        assert_eq!(effects.copies, -1);
        assert_eq!(effects.books_checked_out, 0);
        assert_eq!(effects.total_fines, 1000);
    }

    #[test]
    fn settled_transaction_owes_nothing() {
        for status in TransactionStatus::ALL {
            let effects = CounterEffects::pending(&tx(status, Some(status), 45));
            assert!(effects.is_zero(), "{status} should be settled");
        }
    }

    #[test]
    fn update_guards_marker_and_floors() {
        let update = CounterUpdate::for_transaction(&tx(
            TransactionStatus::Lost,
            Some(TransactionStatus::Active),
            1000,
        ));
        assert_eq!(update.guards.len(), 3);
        assert_eq!(
            update.guards[0],
            Guard::equals(
                FieldPath::new(Collection::Transactions, "t1", "countersApplied"),
                "active"
            )
        );
        assert!(CounterUpdate::is_copy_guard(&update.guards[1]));
        assert!(update.writes.contains(&PathWrite::set(
            FieldPath::new(Collection::Transactions, "t1", "countersApplied"),
            "lost"
        )));

        let fresh = CounterUpdate::for_transaction(&tx(TransactionStatus::Active, None, 0));
        assert_eq!(
            fresh.guards[0],
            Guard::equals(
                FieldPath::new(Collection::Transactions, "t1", "countersApplied"),
                Value::Null
            )
        );
    }
}
