//! Facade error umbrella
//!
//! Integrators see one error type; the inner kinds keep their
//! identity so callers can still distinguish a gate block from a
//! storage conflict from a webhook signature failure.

use paycore_events::EventError;
use paycore_funding::FundingError;
use paycore_ledger::LedgerError;
use paycore_liability::LiabilityError;
use paycore_orchestrator::OrchestratorError;
use paycore_rails::RailError;
use paycore_reconcile::ReconcileError;
use paycore_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PspError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("funding error: {0}")]
    Funding(#[from] FundingError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("liability error: {0}")]
    Liability(#[from] LiabilityError),

    #[error("provider error: {0}")]
    Rail(#[from] RailError),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl PspError {
    /// Whether this is the webhook signature failure; such callbacks
    /// must be dropped without further processing
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, PspError::Rail(RailError::Signature))
    }
}

pub type PspResult<T> = Result<T, PspError>;
