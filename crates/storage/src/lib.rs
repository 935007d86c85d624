//! PayCore Storage - Transactional store with invariant enforcement
//!
//! The store is the last line of defense: positive amounts, distinct
//! debit/credit accounts, append-only tables, uniqueness constraints
//! and status-transition legality are all re-checked at the write
//! boundary, independent of what the calling service validated.
//!
//! Concurrency model: one writer at a time over staged table clones
//! (commit swaps the stage in), snapshot reads, and advisory locks for
//! multi-step sections (gate + reservation, per-instruction writes).

pub mod error;
pub mod locks;
pub mod rows;
pub mod store;
pub mod tables;

pub use error::{StorageError, StorageResult};
pub use locks::{LockKey, LockedKey};
pub use rows::{
    AttemptRow, BankAccountRow, FundingRequestRow, GateEvaluationRow, InstructionRow,
    LedgerAccountRow, LedgerEntryRow, LiabilityEventRow, ReservationRow, ReturnCodeRow,
    SettlementEventRow, SettlementLinkRow, StoredEvent, SubscriptionRow, ENTRY_TYPE_REVERSAL,
};
pub use store::{
    NewAttempt, NewFundingRequest, NewGateEvaluation, NewInstruction, NewLedgerEntry,
    NewLiabilityEvent, NewReservation, NewSettlementEvent, Store, Txn,
};
pub use tables::Tables;
