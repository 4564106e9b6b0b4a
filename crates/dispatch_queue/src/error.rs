//! Dispatch queue errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Every lane together already holds `capacity` entries
    #[error("queue full ({capacity} entries queued)")]
    QueueFull { capacity: usize },

    #[error("queue closed")]
    Closed,
}
