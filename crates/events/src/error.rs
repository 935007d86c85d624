//! Event log errors

use paycore_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("event payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown subscriber: {0}")]
    UnknownSubscriber(String),

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EventResult<T> = Result<T, EventError>;
