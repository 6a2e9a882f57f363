//! Error definitions for the session module

use crate::dispatch::DispatchError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// Raw-data subscription could not be established
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// Angle decoder rejected a frame
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Consumer hand-off failed; the state update is lost
    #[error("Dispatch error: {0}")]
    DispatchError(#[from] DispatchError),

    /// Session worker task failed
    #[error("Worker error: {0}")]
    WorkerError(String),
}
