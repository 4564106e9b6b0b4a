//! Priority dispatch queue.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contracts::{BackoffPolicy, HealthStatus, Priority, QueueSettings, Retryable, StatusTransition};
use observability::{
    record_active_requests, record_dispatch_attempt, record_lane_depth, record_queue_wait_ms,
    RunningStats,
};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::entry::{EntryStatus, HistoryRecord, QueueEntry, RequestId};
use crate::QueueError;

const HEALTHY_FROM: f64 = 90.0;
const WARNING_FROM: f64 = 70.0;

/// Entries queued per lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneLengths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total: usize,
}

/// Lifetime counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_queued: u64,
    pub total_processed: u64,
    pub total_retries: u64,
    pub total_success: u64,
    pub total_failed: u64,
    pub peak_queue_length: usize,
    /// Mean of `started - enqueued` over successful dispatches
    pub average_wait_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueHealth {
    /// `success / (success + failed)` in percent; 100 before any completion
    pub success_rate: f64,
    pub status: HealthStatus,
    pub active: usize,
    pub depth: usize,
    pub average_wait_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub lanes: LaneLengths,
    pub active: usize,
    pub max_concurrent: usize,
    pub paused: bool,
    pub stats: QueueStats,
    pub health: QueueHealth,
}

/// Terminal result of one dispatched entry
#[derive(Debug)]
pub struct Dispatched<P, T, E> {
    pub id: RequestId,
    pub priority: Priority,
    pub payload: P,
    /// Executions performed, at most `max_retries + 1`
    pub attempts: u32,
    pub result: Result<T, E>,
    /// Enqueue to processing start
    pub wait: Duration,
    /// Queue health change caused by this completion
    pub transition: Option<StatusTransition>,
}

/// An entry taken out of its lane and counted against `max_concurrent`
///
/// The concurrency slot is released when this value, or the `dispatch`
/// future consuming it, is dropped.
pub struct ActiveEntry<P> {
    entry: QueueEntry<P>,
    started_at: Instant,
    slot: SlotGuard<P>,
}

impl<P> ActiveEntry<P> {
    pub fn id(&self) -> RequestId {
        self.entry.id
    }

    pub fn priority(&self) -> Priority {
        self.entry.priority
    }

    pub fn payload(&self) -> &P {
        &self.entry.payload
    }

    pub fn status(&self) -> EntryStatus {
        EntryStatus::Processing
    }

    /// Time spent queued
    pub fn wait(&self) -> Duration {
        self.started_at
            .saturating_duration_since(self.entry.enqueued_at)
    }
}

impl<P> fmt::Debug for ActiveEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveEntry")
            .field("id", &self.entry.id)
            .field("priority", &self.entry.priority)
            .finish()
    }
}

struct SlotGuard<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Drop for SlotGuard<P> {
    fn drop(&mut self) {
        let active = {
            let mut state = self.shared.state.lock();
            state.active = state.active.saturating_sub(1);
            state.active
        };
        record_active_requests(active);
        self.shared.notify.notify_waiters();
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_queued: u64,
    total_processed: u64,
    total_retries: u64,
    total_success: u64,
    total_failed: u64,
    peak_queue_length: usize,
}

struct State<P> {
    lanes: [VecDeque<QueueEntry<P>>; 4],
    active: usize,
    paused: bool,
    closed: bool,
    next_id: u64,
    counters: Counters,
    wait_stats: RunningStats,
    history: HeapRb<HistoryRecord>,
    health: HealthStatus,
}

impl<P> State<P> {
    fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    fn lane_lengths(&self) -> LaneLengths {
        LaneLengths {
            critical: self.lanes[Priority::Critical.lane()].len(),
            high: self.lanes[Priority::High.lane()].len(),
            normal: self.lanes[Priority::Normal.lane()].len(),
            low: self.lanes[Priority::Low.lane()].len(),
            total: self.len(),
        }
    }

    fn success_rate(&self) -> f64 {
        let completed = self.counters.total_success + self.counters.total_failed;
        if completed == 0 {
            100.0
        } else {
            self.counters.total_success as f64 / completed as f64 * 100.0
        }
    }

    fn health(&self) -> QueueHealth {
        let success_rate = self.success_rate();
        QueueHealth {
            success_rate,
            status: HealthStatus::from_score_inclusive(success_rate, HEALTHY_FROM, WARNING_FROM),
            active: self.active,
            depth: self.len(),
            average_wait_ms: self.wait_stats.mean(),
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            total_queued: self.counters.total_queued,
            total_processed: self.counters.total_processed,
            total_retries: self.counters.total_retries,
            total_success: self.counters.total_success,
            total_failed: self.counters.total_failed,
            peak_queue_length: self.counters.peak_queue_length,
            average_wait_ms: self.wait_stats.mean(),
        }
    }
}

struct Shared<P> {
    state: Mutex<State<P>>,
    notify: Notify,
    settings: QueueSettings,
    policy: BackoffPolicy,
}

/// Priority dispatch queue, generic over the request payload
///
/// Cloning yields another handle to the same queue.
pub struct DispatchQueue<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for DispatchQueue<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> fmt::Debug for DispatchQueue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DispatchQueue")
            .field("queued", &state.len())
            .field("active", &state.active)
            .field("paused", &state.paused)
            .finish()
    }
}

impl<P> DispatchQueue<P> {
    pub fn new(settings: QueueSettings) -> Self {
        let policy = settings.backoff_policy();
        let state = State {
            lanes: std::array::from_fn(|_| VecDeque::new()),
            active: 0,
            paused: false,
            closed: false,
            next_id: 0,
            counters: Counters::default(),
            wait_stats: RunningStats::default(),
            history: HeapRb::new(settings.max_history.max(1)),
            health: HealthStatus::Healthy,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                notify: Notify::new(),
                settings,
                policy,
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.shared.settings
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.shared.policy
    }

    /// Append to the tail of the entry's lane
    ///
    /// # Errors
    /// `QueueFull` when `max_queue_length` entries are already waiting,
    /// `Closed` after [`close`](Self::close).
    pub fn enqueue(&self, payload: P, priority: Priority) -> Result<RequestId, QueueError> {
        let capacity = self.shared.settings.max_queue_length;
        let (id, depth) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                debug!(priority = %priority, "Queue closed, request rejected");
                return Err(QueueError::Closed);
            }
            if state.len() >= capacity {
                warn!(capacity, priority = %priority, "Queue full, request rejected");
                return Err(QueueError::QueueFull { capacity });
            }

            state.next_id += 1;
            let id = RequestId::new(state.next_id);
            state.lanes[priority.lane()].push_back(QueueEntry {
                id,
                priority,
                payload,
                enqueued_at: Instant::now(),
                enqueued_wall: Utc::now(),
            });

            state.counters.total_queued += 1;
            let total = state.len();
            if total > state.counters.peak_queue_length {
                state.counters.peak_queue_length = total;
            }
            (id, state.lanes[priority.lane()].len())
        };

        record_lane_depth(priority, depth);
        debug!(id = %id, priority = %priority, depth, "Request enqueued");
        self.shared.notify.notify_waiters();
        Ok(id)
    }

    /// Take the next entry, highest lane first
    ///
    /// Returns `None` while paused, at `max_concurrent`, or when empty.
    pub fn dequeue(&self) -> Option<ActiveEntry<P>> {
        let (entry, active, depth) = {
            let mut state = self.shared.state.lock();
            if state.paused || state.active >= self.shared.settings.max_concurrent {
                return None;
            }
            let entry = state.lanes.iter_mut().find_map(VecDeque::pop_front)?;
            state.active += 1;
            let depth = state.lanes[entry.priority.lane()].len();
            (entry, state.active, depth)
        };

        record_active_requests(active);
        record_lane_depth(entry.priority, depth);
        debug!(id = %entry.id, priority = %entry.priority, active, "Request dequeued");

        Some(ActiveEntry {
            entry,
            started_at: Instant::now(),
            slot: SlotGuard {
                shared: Arc::clone(&self.shared),
            },
        })
    }

    /// Wait until an entry can be dequeued
    ///
    /// Wakes on enqueue, resume and slot release.
    pub async fn next(&self) -> ActiveEntry<P> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(active) = self.dequeue() {
                return active;
            }
            notified.await;
        }
    }

    /// Run an entry to a terminal state
    ///
    /// `execute` receives the payload and the 1-based attempt number.
    /// Retryable failures are re-executed after `base * 2^(k-1)` (capped)
    /// for retry `k`, up to `max_retries` times; other failures end the
    /// entry immediately. No lock is held while executing or sleeping.
    #[instrument(
        name = "dispatch_queue_dispatch",
        skip(self, active, execute),
        fields(id = %active.entry.id, priority = %active.entry.priority)
    )]
    pub async fn dispatch<T, E, F, Fut>(
        &self,
        active: ActiveEntry<P>,
        mut execute: F,
    ) -> Dispatched<P, T, E>
    where
        F: FnMut(&P, u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let ActiveEntry {
            entry,
            started_at,
            slot,
        } = active;
        let policy = self.shared.policy;
        let wait = started_at.saturating_duration_since(entry.enqueued_at);

        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            record_dispatch_attempt(entry.priority, attempts);

            match execute(&entry.payload, attempts).await {
                Ok(value) => break Ok(value),
                Err(err) if err.is_retryable() && policy.allows_retry(attempts - 1) => {
                    let delay = policy.delay_for(attempts);
                    self.shared.state.lock().counters.total_retries += 1;
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable failure, backing off"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(attempts, error = %err, "Retries exhausted");
                    } else {
                        debug!(attempts, error = %err, "Non-retryable failure");
                    }
                    break Err(err);
                }
            }
        };

        let status = if result.is_ok() {
            EntryStatus::Success
        } else {
            EntryStatus::Failed
        };
        let completed_at = Instant::now();

        let transition = {
            let mut state = self.shared.state.lock();
            state.counters.total_processed += 1;
            match status {
                EntryStatus::Success => {
                    state.counters.total_success += 1;
                    state.wait_stats.push(wait.as_secs_f64() * 1000.0);
                }
                _ => state.counters.total_failed += 1,
            }

            state.history.push_overwrite(HistoryRecord {
                id: entry.id,
                priority: entry.priority,
                status,
                attempts,
                enqueued_at: entry.enqueued_wall,
                completed_at: Utc::now(),
                duration: completed_at.saturating_duration_since(entry.enqueued_at),
            });

            let next = state.health().status;
            let transition = StatusTransition::between(state.health, next);
            state.health = next;
            transition
        };

        if status == EntryStatus::Success {
            record_queue_wait_ms(entry.priority, wait.as_secs_f64() * 1000.0);
        }
        if let Some(t) = transition {
            info!(from = %t.from, to = %t.to, "Queue health changed");
        }
        debug!(status = %status, attempts, "Request completed");
        drop(slot);

        Dispatched {
            id: entry.id,
            priority: entry.priority,
            payload: entry.payload,
            attempts,
            result,
            wait,
            transition,
        }
    }

    /// Stop further dequeues; in-flight entries run to completion
    pub fn pause(&self) {
        let active = {
            let mut state = self.shared.state.lock();
            state.paused = true;
            state.active
        };
        info!(active, "Queue paused");
    }

    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        info!("Queue resumed");
        self.shared.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Drop every queued entry; returns how many were removed
    pub fn clear(&self) -> usize {
        let removed: Vec<QueueEntry<P>> = {
            let mut state = self.shared.state.lock();
            state.lanes.iter_mut().flat_map(|lane| lane.drain(..)).collect()
        };
        for priority in Priority::ALL {
            record_lane_depth(priority, 0);
        }
        info!(removed = removed.len(), "Queue cleared");
        // payloads are dropped outside the lock
        removed.len()
    }

    /// Refuse further enqueues and drop every queued entry
    ///
    /// Returns how many were removed. In-flight entries are unaffected.
    pub fn close(&self) -> usize {
        let removed: Vec<QueueEntry<P>> = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.lanes.iter_mut().flat_map(|lane| lane.drain(..)).collect()
        };
        for priority in Priority::ALL {
            record_lane_depth(priority, 0);
        }
        info!(removed = removed.len(), "Queue closed");
        removed.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Entries waiting across all lanes
    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries currently executing
    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }

    pub fn health(&self) -> QueueHealth {
        self.shared.state.lock().health()
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.shared.state.lock();
        QueueStatus {
            lanes: state.lane_lengths(),
            active: state.active,
            max_concurrent: self.shared.settings.max_concurrent,
            paused: state.paused,
            stats: state.stats(),
            health: state.health(),
        }
    }

    /// Most recent terminal entries, newest first
    pub fn history(&self, limit: usize) -> Vec<HistoryRecord> {
        let state = self.shared.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }
}
