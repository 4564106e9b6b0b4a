//! ChannelHandle - one notification channel behind an isolated queue and worker task

use std::sync::Arc;

use contracts::{AlertMessage, BackoffPolicy, NotificationChannel};
use observability::record_channel_delivery;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::metrics::ChannelMetrics;

/// Outcome of delivering one alert to one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub channel: String,
    pub success: bool,
    /// Sends performed, 0 when the alert never reached the worker
    pub attempts: u32,
    pub error: Option<String>,
}

impl DeliveryResult {
    fn delivered(channel: &str, attempts: u32) -> Self {
        Self {
            channel: channel.to_string(),
            success: true,
            attempts,
            error: None,
        }
    }

    fn failed(channel: &str, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            success: false,
            attempts,
            error: Some(error.into()),
        }
    }
}

enum Command {
    Deliver {
        message: Arc<AlertMessage>,
        reply: oneshot::Sender<DeliveryResult>,
    },
    Close,
}

/// A delivery handed to a worker, or refused before reaching it
pub enum PendingDelivery {
    Queued {
        channel: String,
        reply: oneshot::Receiver<DeliveryResult>,
    },
    Refused(DeliveryResult),
}

impl PendingDelivery {
    /// Wait until the worker has settled the delivery, retries included
    pub async fn settle(self) -> DeliveryResult {
        match self {
            PendingDelivery::Queued { channel, reply } => reply
                .await
                .unwrap_or_else(|_| DeliveryResult::failed(&channel, 0, "worker stopped")),
            PendingDelivery::Refused(result) => result,
        }
    }
}

/// Handle to a running channel worker
pub struct ChannelHandle {
    name: String,
    tx: mpsc::Sender<Command>,
    metrics: Arc<ChannelMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelHandle {
    /// Spawn the worker task for `channel`
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<C>(channel: C, queue_capacity: usize, policy: BackoffPolicy) -> Self
    where
        C: NotificationChannel + 'static,
    {
        let name = channel.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(ChannelMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker = tokio::spawn(async move {
            channel_worker(channel, rx, worker_metrics, policy, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<ChannelMetrics> {
        &self.metrics
    }

    /// Queue an alert without waiting
    ///
    /// A full queue or a stopped worker is a failed delivery for this
    /// channel only.
    pub fn try_deliver(&self, message: Arc<AlertMessage>) -> PendingDelivery {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::Deliver {
            message,
            reply: reply_tx,
        };

        match self.tx.try_send(command) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                PendingDelivery::Queued {
                    channel: self.name.clone(),
                    reply: reply_rx,
                }
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.inc_dropped();
                record_channel_delivery(&self.name, false);
                warn!(channel = %self.name, "Channel queue full, alert dropped");
                PendingDelivery::Refused(DeliveryResult::failed(&self.name, 0, "queue full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(channel = %self.name, "Channel worker closed unexpectedly");
                PendingDelivery::Refused(DeliveryResult::failed(&self.name, 0, "worker stopped"))
            }
        }
    }

    /// Queue an alert and wait for its result
    pub async fn deliver(&self, message: Arc<AlertMessage>) -> DeliveryResult {
        self.try_deliver(message).settle().await
    }

    /// Drain queued alerts, close the channel and wait for the worker
    #[instrument(name = "channel_handle_shutdown", skip(self), fields(channel = %self.name))]
    pub async fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if self.tx.send(Command::Close).await.is_err() {
            debug!(channel = %self.name, "Worker already stopped");
        }
        if let Err(e) = worker.await {
            error!(channel = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(channel = %self.name, "ChannelHandle shutdown complete");
    }
}

#[instrument(
    name = "channel_worker_loop",
    skip(channel, rx, metrics, policy),
    fields(channel = %name)
)]
async fn channel_worker<C: NotificationChannel>(
    mut channel: C,
    mut rx: mpsc::Receiver<Command>,
    metrics: Arc<ChannelMetrics>,
    policy: BackoffPolicy,
    name: String,
) {
    debug!("Channel worker started");

    while let Some(command) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        let (message, reply) = match command {
            Command::Deliver { message, reply } => (message, reply),
            Command::Close => break,
        };

        let result = deliver_with_retry(&mut channel, &message, policy, &metrics, &name).await;
        if reply.send(result).is_err() {
            debug!(hash = %message.hash, "Delivery result discarded by caller");
        }
    }

    if let Err(e) = channel.close().await {
        error!(error = %e, "Close failed on shutdown");
    }
    debug!("Channel worker stopped");
}

async fn deliver_with_retry<C: NotificationChannel>(
    channel: &mut C,
    message: &AlertMessage,
    policy: BackoffPolicy,
    metrics: &ChannelMetrics,
    name: &str,
) -> DeliveryResult {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match channel.send(message).await {
            Ok(()) => {
                metrics.inc_delivered();
                record_channel_delivery(name, true);
                return DeliveryResult::delivered(name, attempts);
            }
            Err(e) if policy.allows_retry(attempts - 1) => {
                let delay = policy.delay_for(attempts);
                metrics.inc_retries();
                warn!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Send failed, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                metrics.inc_failed();
                record_channel_delivery(name, false);
                error!(attempts, error = %e, "Send failed, giving up");
                return DeliveryResult::failed(name, attempts, e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{AlertSeverity, ContractError};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::{Duration, Instant};

    struct MockChannel {
        name: String,
        sends: Arc<AtomicU32>,
        fail_first: u32,
        delay: Duration,
        closed: Arc<AtomicBool>,
    }

    impl MockChannel {
        fn new(name: &str, fail_first: u32) -> Self {
            Self {
                name: name.to_string(),
                sends: Arc::new(AtomicU32::new(0)),
                fail_first,
                delay: Duration::ZERO,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl NotificationChannel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&mut self, _message: &AlertMessage) -> Result<(), ContractError> {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(ContractError::channel_send(&self.name, "mock failure"));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn message() -> Arc<AlertMessage> {
        Arc::new(AlertMessage::new(
            AlertSeverity::Warning,
            json!({"remaining": 10}),
            "hash",
        ))
    }

    #[tokio::test]
    async fn test_deliver_success() {
        let channel = MockChannel::new("ok", 0);
        let sends = Arc::clone(&channel.sends);
        let handle = ChannelHandle::spawn(channel, 10, BackoffPolicy::default());

        let result = handle.deliver(message()).await;
        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(sends.load(Ordering::SeqCst), 1);
        assert_eq!(handle.metrics().delivered(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff() {
        let channel = MockChannel::new("flaky", 2);
        let handle = ChannelHandle::spawn(channel, 10, BackoffPolicy::from_millis(1000, 30_000, 3));

        let start = Instant::now();
        let result = handle.deliver(message()).await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        // 1000 + 2000
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
        assert_eq!(handle.metrics().retries(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let channel = MockChannel::new("down", u32::MAX);
        let sends = Arc::clone(&channel.sends);
        let handle = ChannelHandle::spawn(channel, 10, BackoffPolicy::from_millis(100, 1000, 3));

        let result = handle.deliver(message()).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 4);
        assert_eq!(sends.load(Ordering::SeqCst), 4);
        assert!(result.error.unwrap().contains("mock failure"));
        assert_eq!(handle.metrics().failed(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_is_refused() {
        let mut channel = MockChannel::new("slow", 0);
        channel.delay = Duration::from_millis(100);
        let handle = ChannelHandle::spawn(channel, 1, BackoffPolicy::default());

        let first = handle.try_deliver(message());
        let second = handle.try_deliver(message());

        let refused = second.settle().await;
        assert!(!refused.success);
        assert_eq!(refused.attempts, 0);
        assert_eq!(handle.metrics().dropped(), 1);

        assert!(first.settle().await.success);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_channel() {
        let channel = MockChannel::new("closing", 0);
        let closed = Arc::clone(&channel.closed);
        let handle = ChannelHandle::spawn(channel, 10, BackoffPolicy::default());

        handle.shutdown().await;
        assert!(closed.load(Ordering::SeqCst));

        // Second shutdown is a no-op, later deliveries fail fast
        handle.shutdown().await;
        let result = handle.deliver(message()).await;
        assert!(!result.success);
    }
}
