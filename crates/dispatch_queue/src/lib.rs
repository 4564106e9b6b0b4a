//! # Dispatch Queue
//!
//! Four strict priority lanes feeding a bounded number of concurrent
//! executions, with exponential backoff on retryable failures.
//!
//! - `enqueue` appends to the tail of the entry's lane
//! - `dequeue`/`next` always drain the highest non-empty lane first
//! - `dispatch` runs one entry to a terminal state and archives it
//!
//! ## Usage
//!
//! ```ignore
//! let queue = DispatchQueue::new(settings);
//! queue.enqueue(request, Priority::High)?;
//!
//! let active = queue.next().await;
//! let done = queue.dispatch(active, |req, attempt| call(req.clone(), attempt)).await;
//! ```

mod entry;
mod error;
mod queue;

pub use entry::{EntryStatus, HistoryRecord, QueueEntry, RequestId};
pub use error::QueueError;
pub use queue::{
    ActiveEntry, DispatchQueue, Dispatched, LaneLengths, QueueHealth, QueueStats, QueueStatus,
};
