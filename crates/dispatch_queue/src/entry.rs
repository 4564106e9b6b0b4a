//! Queue entry types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::Priority;
use serde::Serialize;
use tokio::time::Instant;

/// Identifier assigned at enqueue, unique per queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Entry lifecycle: `Queued -> Processing -> {Success | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Processing,
    Success,
    Failed,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Queued => "queued",
            EntryStatus::Processing => "processing",
            EntryStatus::Success => "success",
            EntryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Success | EntryStatus::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry waiting in its lane
#[derive(Debug)]
pub struct QueueEntry<P> {
    pub id: RequestId,
    pub priority: Priority,
    pub payload: P,
    pub enqueued_at: Instant,
    /// Wall-clock enqueue time, for reporting
    pub enqueued_wall: DateTime<Utc>,
}

/// Archived terminal entry
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: RequestId,
    pub priority: Priority,
    pub status: EntryStatus,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Enqueue to completion
    pub duration: Duration,
}
