//! Submission results

use std::fmt;

use contracts::ApiResponse;
use dispatch_queue::RequestId;
use serde::Serialize;
use thiserror::Error;

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Executed against the remote API
    Network,
    /// Fresh cache entry, no call made
    Cache,
    /// Remote answered "not modified" to a conditional request
    Revalidated,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Revalidated => "revalidated",
        }
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully answered submission
#[derive(Debug, Clone)]
pub struct Served {
    /// Queue id; `None` for cache hits
    pub id: Option<RequestId>,
    pub response: ApiResponse,
    pub source: ResponseSource,
    /// Transport executions, 0 for cache hits
    pub attempts: u32,
    /// Label of the credential used by the final attempt
    pub credential: Option<String>,
}

/// Terminal failure of a submission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Identical request already issued within the dedup window
    #[error("duplicate request within the dedup window")]
    Duplicate,

    #[error("queue full ({capacity} entries queued)")]
    QueueFull { capacity: usize },

    #[error("no healthy credential available")]
    NoHealthyCredential,

    /// Retryable failures until the retry budget ran out
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Non-retryable answer from the remote
    #[error("request rejected{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Rejected { status: Option<u16>, message: String },

    /// Dropped before completion (queue cleared or dispatcher shut down)
    #[error("request cancelled")]
    Cancelled,
}

impl SubmitError {
    /// Short label for metrics and summaries
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::Duplicate => "duplicate",
            SubmitError::QueueFull { .. } => "queue_full",
            SubmitError::NoHealthyCredential => "no_healthy_credential",
            SubmitError::RetriesExhausted { .. } => "retries_exhausted",
            SubmitError::Rejected { .. } => "rejected",
            SubmitError::Cancelled => "cancelled",
        }
    }
}

pub type SubmitResult = Result<Served, SubmitError>;
