//! Circulation engine for Stacks.
//!
//! Lending runs on a store with no multi-record transactions, so every
//! state change is written in two phases:
//!
//! 1. The transaction record itself (append on checkout; a guarded status
//!    change on return or loss).
//! 2. The book and member counters, settled by one guarded multi-path write
//!    that also advances the record's `countersApplied` marker.
//!
//! A failure between the phases surfaces as
//! [`CirculationError::PartialCommit`]. [`Reconciler::reconcile`] finishes
//! such records, and because the marker is guarded it never applies the same
//! effects twice.
//!
//! # Modules
//!
//! - [`engine`]: [`TransactionEngine`]: checkout, return, loss, fines, listings
//! - [`fine`]: overdue fine policy
//! - [`effects`]: per-status counter effects and the settle write
//! - [`reconcile`]: [`Reconciler`]: repair pass and read-only audit
//! - [`config`]: [`CirculationConfig`]
//! - [`error`]: [`CirculationError`]

pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod fine;
pub mod reconcile;

pub use config::CirculationConfig;
pub use effects::{CounterEffects, CounterUpdate};
pub use engine::TransactionEngine;
pub use error::{CirculationError, CirculationResult, IneligibleReason};
pub use reconcile::{AuditReport, ReconcileReport, Reconciler, Violation, ViolationKind};
