//! Ledger errors

use paycore_core::{AccountId, ReservationId, ReservationStatus};
use paycore_events::EventError;
use paycore_storage::StorageError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error(
        "insufficient available funds on account {account}: requested {requested}, available {available}"
    )]
    InsufficientAvailable {
        account: AccountId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("reservation {0} is already {1}")]
    ReservationTerminal(ReservationId, ReservationStatus),
}

impl LedgerError {
    /// Whether this is the double-reversal failure from the storage
    /// boundary
    pub fn is_already_reversed(&self) -> bool {
        matches!(self, LedgerError::Storage(StorageError::AlreadyReversed(_)))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
