//! Funding errors

use paycore_events::EventError;
use paycore_ledger::LedgerError;
use paycore_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FundingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("no funding clearing account exists for this legal entity")]
    NoClearingAccount,
}

pub type FundingResult<T> = Result<T, FundingError>;
