//! Orchestrator errors

use paycore_core::{BatchId, InstructionStatus};
use paycore_events::EventError;
use paycore_rails::RailError;
use paycore_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("provider error: {0}")]
    Rail(#[from] RailError),

    #[error("outbound submission requires a pay-gate batch reference")]
    PayGateRequired,

    #[error("no passing pay-gate evaluation persisted for batch {0}")]
    PayGateNotPassed(BatchId),

    #[error("no registered provider can carry this payment")]
    NoEligibleRail,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("instruction is {0}; operation not allowed")]
    InvalidState(InstructionStatus),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
