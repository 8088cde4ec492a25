//! Repair and audit of book and member counters.
//!
//! [`Reconciler::reconcile`] finishes partial commits: every transaction
//! whose `countersApplied` marker lags its status gets the missing counter
//! effects written, through the same guarded write the engine uses, so a
//! second run finds nothing to do. [`Reconciler::audit`] only reads.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use stacks_store::{typed, Collection, RecordStore, StoreError, WriteOutcome};
use stacks_types::{Book, BookId, Member, Transaction, TransactionId, TransactionStatus};
use tracing::{debug, info, warn};

use crate::effects::CounterUpdate;
use crate::error::CirculationResult;

/// Outcome of one reconcile pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub repaired: Vec<TransactionId>,
    pub skipped: Vec<(TransactionId, String)>,
}

impl ReconcileReport {
    /// Returns `true` if nothing needed repair and nothing was skipped.
    pub fn is_noop(&self) -> bool {
        self.repaired.is_empty() && self.skipped.is_empty()
    }
}

/// Result of a counter audit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub books_checked: usize,
    pub members_checked: usize,
    pub transactions_checked: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    /// Returns `true` if all checks passed.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific invariant violation found by the audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub collection: Collection,
    pub key: String,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// `availableCopies` outside `0..=copies`.
    AvailableOutOfRange,
    /// More copies on the shelf than `copies` minus active loans.
    ShelfExceedsUnloaned,
    /// `currentFines` negative or above `totalFines`.
    FinesOutOfRange,
    /// Counter effects recorded on the transaction but not yet written.
    CountersPending,
    /// Transaction pointing at a book or member that does not exist.
    DanglingReference,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AvailableOutOfRange => "available_out_of_range",
            Self::ShelfExceedsUnloaned => "shelf_exceeds_unloaned",
            Self::FinesOutOfRange => "fines_out_of_range",
            Self::CountersPending => "counters_pending",
            Self::DanglingReference => "dangling_reference",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter repair and audit over a record store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Apply missing counter effects for every transaction that needs them.
    ///
    /// A record whose write is refused (guard rejected, book or member
    /// missing) is skipped with a reason and left for an operator. A store
    /// outage aborts the pass; whatever was repaired before it stays
    /// repaired.
    pub async fn reconcile(&self) -> CirculationResult<ReconcileReport> {
        let transactions: Vec<Transaction> =
            typed::scan(self.store.as_ref(), Collection::Transactions, None).await?;
        let mut report = ReconcileReport {
            scanned: transactions.len(),
            ..ReconcileReport::default()
        };

        for tx in transactions.iter().filter(|t| t.counters_pending()) {
            let update = CounterUpdate::for_transaction(tx);
            match self.store.guarded_update(&update.guards, &update.writes).await {
                Ok(WriteOutcome::Applied) => {
                    warn!(
                        transaction = %tx.id,
                        from = ?tx.counters_applied,
                        to = %tx.status,
                        effects = ?update.effects,
                        "repaired counters"
                    );
                    report.repaired.push(tx.id.clone());
                }
                Ok(WriteOutcome::Rejected { guard, actual }) => {
                    debug!(transaction = %tx.id, %guard, %actual, "repair refused");
                    report
                        .skipped
                        .push((tx.id.clone(), format!("{guard} did not hold (found {actual})")));
                }
                Err(StoreError::Unavailable(reason)) => {
                    return Err(StoreError::Unavailable(reason).into());
                }
                Err(e) => report.skipped.push((tx.id.clone(), e.to_string())),
            }
        }

        info!(
            scanned = report.scanned,
            repaired = report.repaired.len(),
            skipped = report.skipped.len(),
            "reconcile finished"
        );
        Ok(report)
    }

    /// Check stored counters against their invariants without writing.
    pub async fn audit(&self) -> CirculationResult<AuditReport> {
        let store = self.store.as_ref();
        let books: Vec<Book> = typed::scan(store, Collection::Books, None).await?;
        let members: Vec<Member> = typed::scan(store, Collection::Members, None).await?;
        let transactions: Vec<Transaction> =
            typed::scan(store, Collection::Transactions, None).await?;

        let mut violations = Vec::new();
        let mut on_loan: HashMap<&BookId, i64> = HashMap::new();
        let mut unsettled: HashSet<&BookId> = HashSet::new();
        let book_ids: HashSet<&BookId> = books.iter().map(|b| &b.id).collect();
        let member_ids: HashSet<_> = members.iter().map(|m| &m.id).collect();

        for tx in &transactions {
            if tx.counters_pending() {
                unsettled.insert(&tx.book_id);
                violations.push(Violation {
                    collection: Collection::Transactions,
                    key: tx.id.to_string(),
                    kind: ViolationKind::CountersPending,
                    description: format!(
                        "status {} but counters applied for {}",
                        tx.status,
                        tx.counters_applied.map_or("nothing", |s| s.as_str())
                    ),
                });
            }
            if tx.status == TransactionStatus::Active {
                *on_loan.entry(&tx.book_id).or_default() += 1;
            }
            if !book_ids.contains(&tx.book_id) || !member_ids.contains(&tx.member_id) {
                violations.push(Violation {
                    collection: Collection::Transactions,
                    key: tx.id.to_string(),
                    kind: ViolationKind::DanglingReference,
                    description: format!("book {} / member {}", tx.book_id, tx.member_id),
                });
            }
        }

        for book in &books {
            if !book.counters_consistent() {
                violations.push(Violation {
                    collection: Collection::Books,
                    key: book.id.to_string(),
                    kind: ViolationKind::AvailableOutOfRange,
                    description: format!(
                        "availableCopies={} copies={}",
                        book.available_copies, book.copies
                    ),
                });
            }
            let loaned = on_loan.get(&book.id).copied().unwrap_or(0);
            if !unsettled.contains(&book.id) && book.available_copies > book.copies - loaned {
                violations.push(Violation {
                    collection: Collection::Books,
                    key: book.id.to_string(),
                    kind: ViolationKind::ShelfExceedsUnloaned,
                    description: format!(
                        "availableCopies={} but copies={} with {loaned} on loan",
                        book.available_copies, book.copies
                    ),
                });
            }
        }

        for member in &members {
            if member.current_fines < 0 || member.current_fines > member.total_fines {
                violations.push(Violation {
                    collection: Collection::Members,
                    key: member.id.to_string(),
                    kind: ViolationKind::FinesOutOfRange,
                    description: format!(
                        "currentFines={} totalFines={}",
                        member.current_fines, member.total_fines
                    ),
                });
            }
        }

        let report = AuditReport {
            books_checked: books.len(),
            members_checked: members.len(),
            transactions_checked: transactions.len(),
            violations,
        };
        info!(violations = report.violations.len(), "audit finished");
        Ok(report)
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}
