use crate::MessageConsumptionError;
use std::time::Duration;
use thiserror::Error;

/// Raised by a [`crate::MessageSource`] implementation.
#[derive(Debug, Clone, Error)]
pub enum MessageClientError {
    // can be retried in a bit, like a network issue
    #[error("transient message client error: {0}")]
    Transient(String),

    // requires human intervention, like a config issue
    #[error("unrecoverable message client error: {0}")]
    Unrecoverable(String),
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("receive: {0}")]
    Receive(#[source] MessageClientError),

    #[error("delete: {0}")]
    Delete(#[source] MessageClientError),

    #[error("handler: {0}")]
    Handler(#[source] MessageConsumptionError),
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease ttl must be > 0, got {0:?}")]
    InvalidTtl(Duration),

    #[error("lease backend: {0}")]
    Backend(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("invalid runner config: {0}")]
    InvalidConfig(String),

    #[error("runner cancelled")]
    Cancelled,

    #[error("runner deadline exceeded")]
    DeadlineExceeded,

    #[error("all workers exited while the runner was still running")]
    WorkersExited,
}
