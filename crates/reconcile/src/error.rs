//! Reconciliation errors

use paycore_events::EventError;
use paycore_ledger::LedgerError;
use paycore_liability::LiabilityError;
use paycore_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("liability error: {0}")]
    Liability(#[from] LiabilityError),

    #[error("unknown bank account: {0}")]
    UnknownBankAccount(paycore_core::BankAccountId),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
