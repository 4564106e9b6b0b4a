//! Dispatcher error types

use std::fmt;

use contracts::{Retryable, TransportError};
use credential_pool::PoolError;
use thiserror::Error;

/// Failure while assembling a dispatcher
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("credential pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("notifier error: {0}")]
    Notifier(#[from] notifier::NotifierError),

    #[error("configuration error: {0}")]
    Contract(#[from] contracts::ContractError),
}

/// Failure of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// No credential qualified for selection
    NoCredential(PoolError),
    /// The transport failed or answered with an error status
    Transport(TransportError),
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::NoCredential(_) => false,
            AttemptError::Transport(e) => e.is_retryable(),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::NoCredential(e) => write!(f, "{e}"),
            AttemptError::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AttemptError {}
