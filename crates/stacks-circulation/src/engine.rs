use chrono::{DateTime, Utc};
use serde_json::Value;
use stacks_catalog::Catalog;
use stacks_store::{
    server_value, typed, Collection, FieldPath, Guard, PathWrite, RecordStore, StoreError,
    WriteOutcome,
};
use stacks_types::member::field as member_field;
use stacks_types::transaction::field;
use stacks_types::{
    Amount, BookId, Clock, MemberId, MemberStatus, Record, Transaction, TransactionId,
    TransactionStatus,
};
use tracing::{debug, info, warn};

use crate::config::CirculationConfig;
use crate::effects::CounterUpdate;
use crate::error::{CirculationError, CirculationResult, IneligibleReason};
use crate::fine;

/// How an active record looked in the store when it was loaded.
struct StoredState {
    /// Status exactly as stored, `overdue` included.
    status: Value,
    has_marker: bool,
}

/// Checkout, return, loss, and fine workflows over a shared store.
///
/// Every state change is two phases: the transaction record is written
/// first, then the book and member counters are settled by a guarded write
/// keyed on the record's `countersApplied` marker. If the second phase fails
/// the operation returns [`CirculationError::PartialCommit`] and the
/// [`Reconciler`](crate::Reconciler) finishes the job later.
#[derive(Clone, Debug)]
pub struct TransactionEngine {
    catalog: Catalog,
    config: CirculationConfig,
}

impl TransactionEngine {
    /// Build an engine over `catalog`'s store and clock. The configuration is
    /// validated here.
    pub fn new(catalog: Catalog, config: CirculationConfig) -> CirculationResult<Self> {
        config.validate()?;
        Ok(Self { catalog, config })
    }

    pub fn config(&self) -> &CirculationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn store(&self) -> &dyn RecordStore {
        self.catalog.store().as_ref()
    }

    fn now(&self) -> DateTime<Utc> {
        self.catalog.clock().now()
    }

    /// Lend one copy of a book to a member.
    pub async fn checkout(
        &self,
        book_id: &BookId,
        member_id: &MemberId,
    ) -> CirculationResult<TransactionId> {
        let now = self.now();
        let book = self.catalog.find_book(book_id).await?;
        let member = self.catalog.find_member(member_id).await?;

        let refuse = |reason: IneligibleReason| {
            debug!(book = %book_id, member = %member_id, reason = reason.as_str(), "checkout refused");
            Err(CirculationError::IneligibleCheckout(reason))
        };
        let Some(book) = book else {
            return refuse(IneligibleReason::BookNotFound);
        };
        let Some(member) = member else {
            return refuse(IneligibleReason::MemberNotFound);
        };
        if book.available_copies <= 0 {
            return refuse(IneligibleReason::NoAvailableCopies);
        }
        if member.status != MemberStatus::Active {
            return refuse(IneligibleReason::MemberInactive(member.status));
        }
        if member.has_outstanding_fines() {
            return refuse(IneligibleReason::OutstandingFines(member.current_fines));
        }
        if member.is_expired(now) {
            return refuse(IneligibleReason::MembershipExpired);
        }

        let mut tx = Transaction::open(
            book_id.clone(),
            member_id.clone(),
            now,
            now + self.config.checkout_period(),
        );
        let mut fields = tx.to_fields().map_err(StoreError::from)?;
        fields.insert(field::CREATED_AT.into(), server_value::timestamp());
        fields.insert(field::UPDATED_AT.into(), server_value::timestamp());
        tx.id = TransactionId::from(self.store().append(Collection::Transactions, fields).await?);

        let update = CounterUpdate::for_transaction(&tx);
        match self.store().guarded_update(&update.guards, &update.writes).await {
            Ok(WriteOutcome::Applied) => {
                info!(
                    transaction = %tx.id,
                    book = %book_id,
                    member = %member_id,
                    due = %tx.due_date,
                    "book checked out"
                );
                Ok(tx.id)
            }
            Ok(WriteOutcome::Rejected { guard, .. }) if CounterUpdate::is_copy_guard(&guard) => {
                // The last copy went to a concurrent checkout. The record never
                // took effect, so drop it.
                match self.store().delete(Collection::Transactions, tx.id.as_str()).await {
                    Ok(_) => refuse(IneligibleReason::NoAvailableCopies),
                    Err(e) => {
                        warn!(transaction = %tx.id, error = %e, "could not remove refused checkout");
                        Err(CirculationError::partial(&tx.id, e))
                    }
                }
            }
            Ok(WriteOutcome::Rejected { guard, actual }) => {
                self.settled_elsewhere(&tx.id, &guard, &actual).await?;
                Ok(tx.id)
            }
            Err(e) => {
                warn!(transaction = %tx.id, error = %e, "checkout counters not applied");
                Err(CirculationError::partial(&tx.id, e))
            }
        }
    }

    /// Close an active loan and charge any overdue fine. Returns the fine.
    pub async fn return_book(&self, id: &TransactionId) -> CirculationResult<Amount> {
        let now = self.now();
        let (mut tx, stored) = self.load_active(id).await?;
        let fine = fine::overdue_fine(&self.config, tx.due_date, now);

        self.close(
            &tx,
            stored,
            vec![
                (field::STATUS, Value::from(TransactionStatus::Returned.as_str())),
                (field::RETURN_DATE, Value::from(now.timestamp_millis())),
                (field::FINE_AMOUNT, Value::from(fine)),
            ],
        )
        .await?;
        tx.status = TransactionStatus::Returned;
        tx.return_date = Some(now);
        tx.fine_amount = fine;

        self.settle(&tx).await?;
        info!(transaction = %id, book = %tx.book_id, member = %tx.member_id, fine, "book returned");
        Ok(fine)
    }

    /// Close an active loan as lost, charging the flat lost-book fine and
    /// writing one unit off the book's stock. Returns the fine.
    pub async fn report_lost(&self, id: &TransactionId) -> CirculationResult<Amount> {
        let (mut tx, stored) = self.load_active(id).await?;

        let book = self.catalog.get_book(&tx.book_id).await?;
        if book.available_copies < 1 || book.copies < 1 {
            return Err(CirculationError::Inconsistent(format!(
                "book {} has copies={} availableCopies={}; writing off a unit would go below zero",
                book.id, book.copies, book.available_copies
            )));
        }

        let fine = self.config.lost_book_fine;
        self.close(
            &tx,
            stored,
            vec![
                (field::STATUS, Value::from(TransactionStatus::Lost.as_str())),
                (field::FINE_AMOUNT, Value::from(fine)),
            ],
        )
        .await?;
        tx.status = TransactionStatus::Lost;
        tx.fine_amount = fine;

        self.settle(&tx).await?;
        info!(transaction = %id, book = %tx.book_id, member = %tx.member_id, fine, "book reported lost");
        Ok(fine)
    }

    /// Pay down a member's outstanding fines. Overpayment clears the balance
    /// and is not carried forward. Returns the remaining balance.
    pub async fn pay_fines(&self, member_id: &MemberId, amount: Amount) -> CirculationResult<Amount> {
        if amount <= 0 {
            return Err(CirculationError::Validation {
                field: "amount",
                reason: format!("payment must be positive, got {amount}"),
            });
        }
        let member = self.catalog.get_member(member_id).await?;
        let current = member.current_fines.max(0);
        let applied = amount.min(current);
        if applied == 0 {
            debug!(member = %member_id, amount, "no outstanding fines to pay");
            return Ok(0);
        }

        let path = |name: &str| FieldPath::new(Collection::Members, member_id.as_str(), name);
        let guards = [Guard::at_least(path(member_field::CURRENT_FINES), applied)];
        let writes = [
            PathWrite::increment(path(member_field::CURRENT_FINES), -applied),
            PathWrite::server_timestamp(path(member_field::UPDATED_AT)),
        ];
        match self.store().guarded_update(&guards, &writes).await? {
            WriteOutcome::Applied => {
                let remaining = current - applied;
                info!(member = %member_id, paid = applied, remaining, "fines paid");
                Ok(remaining)
            }
            WriteOutcome::Rejected { guard, actual } => Err(CirculationError::Conflict(format!(
                "{guard} no longer holds (now {actual})"
            ))),
        }
    }

    /// Fine for a transaction: the settled amount once closed, or the fine
    /// accrued so far while still active.
    pub async fn calculate_fine(&self, id: &TransactionId) -> CirculationResult<Amount> {
        let tx = self.get_transaction(id).await?;
        Ok(self.fine_as_of(&tx, self.now()))
    }

    pub fn fine_as_of(&self, tx: &Transaction, at: DateTime<Utc>) -> Amount {
        match tx.status {
            TransactionStatus::Active => fine::overdue_fine(&self.config, tx.due_date, at),
            TransactionStatus::Returned | TransactionStatus::Lost => tx.fine_amount,
        }
    }

    pub fn is_overdue(&self, tx: &Transaction) -> bool {
        tx.is_overdue(self.now())
    }

    pub async fn get_transaction(&self, id: &TransactionId) -> CirculationResult<Transaction> {
        typed::load(self.store(), Collection::Transactions, id.as_str())
            .await?
            .ok_or_else(|| CirculationError::NotFound {
                entity: "transaction",
                id: id.to_string(),
            })
    }

    /// Every open loan, including records stored with the legacy `overdue`
    /// status, in key order.
    pub async fn get_active_transactions(&self) -> CirculationResult<Vec<Transaction>> {
        let mut active: Vec<Transaction> = Vec::new();
        for stored in [TransactionStatus::Active.as_str(), "overdue"] {
            let batch: Vec<Transaction> = typed::query(
                self.store(),
                Collection::Transactions,
                field::STATUS,
                &Value::from(stored),
            )
            .await?;
            active.extend(batch);
        }
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    /// Open loans past their due date right now.
    pub async fn get_overdue_transactions(&self) -> CirculationResult<Vec<Transaction>> {
        let now = self.now();
        let mut active = self.get_active_transactions().await?;
        active.retain(|tx| tx.is_overdue(now));
        Ok(active)
    }

    pub async fn get_member_transactions(
        &self,
        member_id: &MemberId,
    ) -> CirculationResult<Vec<Transaction>> {
        Ok(typed::query(
            self.store(),
            Collection::Transactions,
            field::MEMBER_ID,
            &Value::from(member_id.as_str()),
        )
        .await?)
    }

    pub async fn get_book_transactions(
        &self,
        book_id: &BookId,
    ) -> CirculationResult<Vec<Transaction>> {
        Ok(typed::query(
            self.store(),
            Collection::Transactions,
            field::BOOK_ID,
            &Value::from(book_id.as_str()),
        )
        .await?)
    }

    /// Load a transaction that must be active, along with how it is stored
    /// (a legacy record may say `overdue` and carry no marker).
    async fn load_active(&self, id: &TransactionId) -> CirculationResult<(Transaction, StoredState)> {
        let fields = self
            .store()
            .get(Collection::Transactions, id.as_str())
            .await?
            .ok_or_else(|| CirculationError::NotFound {
                entity: "transaction",
                id: id.to_string(),
            })?;
        let stored = StoredState {
            status: fields.get(field::STATUS).cloned().unwrap_or(Value::Null),
            has_marker: fields.contains_key(field::COUNTERS_APPLIED),
        };
        let tx = Transaction::from_fields(id.as_str(), fields).map_err(StoreError::from)?;
        if tx.status != TransactionStatus::Active {
            return Err(CirculationError::InvalidTransactionState {
                id: id.clone(),
                actual: tx.status,
                expected: TransactionStatus::Active,
            });
        }
        Ok((tx, stored))
    }

    /// Phase one of a close: move the record off `active`, guarded on the
    /// status still being what was read so two closes cannot both win.
    ///
    /// A record with no stored marker had its checkout counters applied
    /// before markers existed; the marker is written here so the settle
    /// guard in phase two has something to match.
    async fn close(
        &self,
        tx: &Transaction,
        stored: StoredState,
        fields: Vec<(&str, Value)>,
    ) -> CirculationResult<()> {
        let path = |name: &str| FieldPath::new(Collection::Transactions, tx.id.as_str(), name);
        let guards = [Guard::equals(path(field::STATUS), stored.status)];
        let mut writes: Vec<PathWrite> = fields
            .into_iter()
            .map(|(name, value)| PathWrite::set(path(name), value))
            .collect();
        if !stored.has_marker {
            writes.push(PathWrite::set(
                path(field::COUNTERS_APPLIED),
                TransactionStatus::Active.as_str(),
            ));
        }
        writes.push(PathWrite::server_timestamp(path(field::UPDATED_AT)));

        match self.store().guarded_update(&guards, &writes).await? {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::Rejected { actual, .. } => {
                let actual = actual
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(TransactionStatus::Active);
                Err(CirculationError::InvalidTransactionState {
                    id: tx.id.clone(),
                    actual,
                    expected: TransactionStatus::Active,
                })
            }
        }
    }

    /// Phase two: settle the counters for `tx`'s new status. Any failure
    /// leaves a record the reconciler can finish.
    async fn settle(&self, tx: &Transaction) -> CirculationResult<()> {
        let update = CounterUpdate::for_transaction(tx);
        match self.store().guarded_update(&update.guards, &update.writes).await {
            Ok(WriteOutcome::Applied) => Ok(()),
            Ok(WriteOutcome::Rejected { guard, actual }) => {
                self.settled_elsewhere(&tx.id, &guard, &actual).await
            }
            Err(e) => {
                warn!(transaction = %tx.id, error = %e, "counters not applied");
                Err(CirculationError::partial(&tx.id, e))
            }
        }
    }

    /// A settle write was rejected. That is fine if someone else (usually
    /// the reconciler) already settled the record; anything else is a
    /// partial commit.
    async fn settled_elsewhere(
        &self,
        id: &TransactionId,
        guard: &Guard,
        actual: &Value,
    ) -> CirculationResult<()> {
        if let Ok(current) = self.get_transaction(id).await {
            if !current.counters_pending() {
                debug!(transaction = %id, "counters already settled");
                return Ok(());
            }
        }
        warn!(transaction = %id, %guard, %actual, "counter guard rejected");
        Err(CirculationError::partial(
            id,
            format!("{guard} did not hold (found {actual})"),
        ))
    }
}
