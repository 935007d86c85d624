//! Storage errors

use paycore_core::{AccountId, EntryId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised at the storage boundary.
///
/// `NonPositiveAmount`, `SelfTransfer` and the transition checks fire
/// regardless of what the calling service validated; the store is the
/// last line of defense for every invariant in the data model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("amount must be strictly positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("debit and credit accounts must differ, both were {0}")]
    SelfTransfer(AccountId),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} does not belong to the requesting tenant")]
    TenantMismatch { entity: &'static str, id: String },

    #[error("idempotency key {key:?} was already used with a different payload")]
    IdempotencyConflict { key: String },

    #[error("duplicate {entity} for unique key {key}")]
    UniqueViolation { entity: &'static str, key: String },

    #[error("illegal {entity} transition {from} -> {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("ledger entry {0} is already reversed")]
    AlreadyReversed(EntryId),

    #[error("{0} rows are append-only")]
    AppendOnly(&'static str),

    #[error("domain event deletes require the session-scoped erase gate")]
    EraseGateClosed,

    #[error("event payload serialization failed: {0}")]
    Serialization(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
