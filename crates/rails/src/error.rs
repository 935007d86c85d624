//! Rail provider errors
//!
//! The split that matters downstream is retryable vs not: the
//! orchestrator retries the former with backoff and records a terminal
//! failure for the latter. Signature failures are their own kind and
//! are never parsed further.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RailError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider rate limited: {0}")]
    RateLimited(String),

    #[error("rejected by provider: {0}")]
    Rejected(String),

    #[error("unknown provider request id: {0}")]
    UnknownRequest(String),

    #[error("operation not supported by this rail: {0}")]
    Unsupported(String),

    #[error("webhook signature verification failed")]
    Signature,

    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}

impl RailError {
    /// Whether the orchestrator may retry the operation
    pub fn retryable(&self) -> bool {
        matches!(self, RailError::Unavailable(_) | RailError::RateLimited(_))
    }
}

pub type RailResult<T> = Result<T, RailError>;
