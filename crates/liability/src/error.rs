//! Liability errors

use paycore_events::EventError;
use paycore_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiabilityError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("event error: {0}")]
    Event(#[from] EventError),
}

pub type LiabilityResult<T> = Result<T, LiabilityError>;
