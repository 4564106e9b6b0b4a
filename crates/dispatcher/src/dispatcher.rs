//! Dispatcher - submission entry point, worker loop and background tasks

use std::sync::Arc;

use chrono::Utc;
use contracts::{
    ApiResponse, DispatchBlueprint, MonitorSettings, Priority, RequestDescriptor, Retryable,
    Transport, TransportError,
};
use credential_pool::{CredentialLease, CredentialPool, PoolEvent, PoolStatus, RotationRecord};
use dispatch_queue::{ActiveEntry, DispatchQueue, HistoryRecord, QueueError, QueueStatus};
use notifier::{AlertRecord, Notifier, NotifierBuilder, NotifierStats};
use observability::{
    record_cache_eviction, record_cache_lookup, record_cache_size, record_credential_health,
    record_dedup_rejected, record_pool_status, record_request_latency_ms, record_submission,
};
use parking_lot::Mutex;
use response_cache::{CacheHealth, CacheLookup, CacheStats, ResponseCache, Revalidation};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{alert_for, HealthEvent};
use crate::error::{AttemptError, DispatcherError};
use crate::maintenance::MaintenanceReport;
use crate::outcome::{ResponseSource, Served, SubmitError, SubmitResult};

const RECENT_ALERTS: usize = 10;

/// Queued submission
struct Job {
    request: RequestDescriptor,
    reply: oneshot::Sender<SubmitResult>,
    submitted_at: Instant,
}

/// Successful exchange with the remote
struct Exchange {
    response: ApiResponse,
    credential: String,
    /// A stored validator was sent with the request
    conditional: bool,
}

/// Comprehensive report
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    pub pool: PoolStatus,
    pub queue: QueueStatus,
    pub cache: CacheStats,
    pub cache_health: CacheHealth,
    pub notifier: NotifierStats,
    pub recent_alerts: Vec<AlertRecord>,
}

struct Inner<T> {
    transport: T,
    pool: CredentialPool,
    cache: ResponseCache,
    queue: DispatchQueue<Job>,
    notifier: Notifier,
    events: mpsc::UnboundedSender<HealthEvent>,
    decay: Mutex<Option<Instant>>,
}

/// Builds a [`Dispatcher`] from a blueprint and a transport
pub struct DispatcherBuilder<T> {
    blueprint: DispatchBlueprint,
    transport: T,
    notifier: Option<Notifier>,
}

impl<T> DispatcherBuilder<T>
where
    T: Transport + Sync + 'static,
{
    /// Credentials in the blueprint must already carry resolved secrets
    pub fn new(blueprint: DispatchBlueprint, transport: T) -> Self {
        Self {
            blueprint,
            transport,
            notifier: None,
        }
    }

    /// Use this notifier instead of one built from the blueprint
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Assemble the components and start the background tasks
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(credentials = self.blueprint.credentials.len())
    )]
    pub async fn build(self) -> Result<Dispatcher<T>, DispatcherError> {
        let blueprint = self.blueprint;
        let pool = CredentialPool::from_config(&blueprint.credentials, &blueprint.pool)?;
        let notifier = match self.notifier {
            Some(notifier) => notifier,
            None => {
                NotifierBuilder::new(blueprint.notifications.clone())
                    .build()
                    .await?
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            transport: self.transport,
            pool,
            cache: ResponseCache::new(blueprint.cache.clone()),
            queue: DispatchQueue::new(blueprint.queue.clone()),
            notifier,
            events: events_tx,
            decay: Mutex::new(None),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(run_workers(Arc::clone(&inner), shutdown_rx.clone())),
            tokio::spawn(run_alert_bridge(Arc::clone(&inner), events_rx, shutdown_rx.clone())),
            tokio::spawn(run_maintenance(
                Arc::clone(&inner),
                blueprint.monitor.clone(),
                shutdown_rx,
            )),
        ];

        info!(
            credentials = inner.pool.len(),
            max_concurrent = blueprint.queue.max_concurrent,
            channels = inner.notifier.channel_names().len(),
            "Dispatcher started"
        );

        Ok(Dispatcher {
            inner,
            shutdown: shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Rate-limit-aware request dispatcher
pub struct Dispatcher<T> {
    inner: Arc<Inner<T>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> Dispatcher<T>
where
    T: Transport + Sync + 'static,
{
    /// Submit a request and wait for its terminal result
    ///
    /// Cacheable requests are answered from a fresh cache entry first. A
    /// miss that repeats a request seen within the dedup window is
    /// rejected; anything else is queued at `priority`.
    #[instrument(
        name = "dispatcher_submit",
        skip_all,
        fields(method = %request.method, endpoint = %request.endpoint, priority = %priority)
    )]
    pub async fn submit(&self, request: RequestDescriptor, priority: Priority) -> SubmitResult {
        let submitted_at = Instant::now();
        let inner = &self.inner;

        if *self.shutdown.borrow() {
            let result = Err(SubmitError::Cancelled);
            finish_submission(&result, submitted_at);
            return result;
        }

        if request.is_cacheable() {
            let lookup = inner.cache.get(&request);
            record_cache_lookup(lookup.is_hit());
            if let CacheLookup::Hit(response) = lookup {
                debug!("Served from cache");
                let served = Served {
                    id: None,
                    response,
                    source: ResponseSource::Cache,
                    attempts: 0,
                    credential: None,
                };
                finish_submission(&Ok(served.clone()), submitted_at);
                return Ok(served);
            }
        }

        if inner.cache.is_duplicate(&request) {
            record_dedup_rejected();
            let result = Err(SubmitError::Duplicate);
            finish_submission(&result, submitted_at);
            return result;
        }

        let key = inner.cache.fingerprint(&request);
        let (reply, receiver) = oneshot::channel();
        let job = Job {
            request,
            reply,
            submitted_at,
        };
        if let Err(e) = inner.queue.enqueue(job, priority) {
            // never reached the network, an identical retry must not be a duplicate
            inner.cache.forget(&key);
            let result = match e {
                QueueError::QueueFull { capacity } => Err(SubmitError::QueueFull { capacity }),
                QueueError::Closed => Err(SubmitError::Cancelled),
            };
            finish_submission(&result, submitted_at);
            return result;
        }

        receiver.await.unwrap_or_else(|_| {
            let result = Err(SubmitError::Cancelled);
            finish_submission(&result, submitted_at);
            result
        })
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.queue.status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn status(&self) -> DispatcherStatus {
        let inner = &self.inner;
        DispatcherStatus {
            pool: inner.pool.status(),
            queue: inner.queue.status(),
            cache: inner.cache.stats(),
            cache_health: inner.cache.health(),
            notifier: inner.notifier.stats(),
            recent_alerts: inner.notifier.history(RECENT_ALERTS),
        }
    }

    pub fn rotation_history(&self, limit: usize) -> Vec<RotationRecord> {
        self.inner.pool.rotation_history(limit)
    }

    pub fn queue_history(&self, limit: usize) -> Vec<HistoryRecord> {
        self.inner.queue.history(limit)
    }

    pub fn alert_history(&self, limit: usize) -> Vec<AlertRecord> {
        self.inner.notifier.history(limit)
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.inner.pool
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Stop dispatching; in-flight requests finish
    pub fn pause(&self) {
        self.inner.queue.pause();
    }

    pub fn resume(&self) {
        self.inner.queue.resume();
    }

    /// Drop queued requests; their submitters receive `Cancelled`
    pub fn clear(&self) -> usize {
        self.inner.queue.clear()
    }

    /// Run one maintenance pass now
    pub fn maintain(&self) -> MaintenanceReport {
        self.inner.maintain()
    }

    /// Stop the background tasks
    ///
    /// Queued requests are cancelled, in-flight ones complete and pending
    /// alerts are delivered before the channels close. Later submissions
    /// fail with `Cancelled`.
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        if self.shutdown.send(true).is_err() {
            debug!("Background tasks already stopped");
        }
        let cancelled = self.inner.queue.close();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = ?e, "Background task panicked");
            }
        }

        self.inner.notifier.shutdown().await;
        info!(cancelled, "Dispatcher shutdown complete");
    }
}

impl<T> Inner<T>
where
    T: Transport + Sync + 'static,
{
    /// Run one queue entry to completion and answer its submitter
    async fn process(self: Arc<Self>, active: ActiveEntry<Job>) {
        let done = self
            .queue
            .dispatch(active, |job, attempt| {
                let inner = Arc::clone(&self);
                let request = job.request.clone();
                async move { inner.attempt(request, attempt).await }
            })
            .await;

        if let Some(transition) = done.transition {
            let success_rate = self.queue.health().success_rate;
            self.publish(HealthEvent::Queue {
                transition,
                success_rate,
            });
        }

        let Job {
            request,
            reply,
            submitted_at,
        } = done.payload;

        let result = match done.result {
            Ok(exchange) => self.settle(&request, exchange, done.attempts).map(|mut served| {
                served.id = Some(done.id);
                served
            }),
            Err(AttemptError::NoCredential(_)) => Err(SubmitError::NoHealthyCredential),
            Err(AttemptError::Transport(e)) if e.is_retryable() => {
                Err(SubmitError::RetriesExhausted {
                    attempts: done.attempts,
                    last_error: e.to_string(),
                })
            }
            Err(AttemptError::Transport(e)) => Err(SubmitError::Rejected {
                status: e.status,
                message: e.message,
            }),
        };

        finish_submission(&result, submitted_at);
        if reply.send(result).is_err() {
            debug!(id = %done.id, "Submitter went away before the result");
        }
    }

    /// One execution with a freshly selected credential
    #[instrument(
        name = "dispatcher_attempt",
        skip_all,
        fields(endpoint = %request.endpoint, attempt = attempt)
    )]
    async fn attempt(
        &self,
        request: RequestDescriptor,
        attempt: u32,
    ) -> Result<Exchange, AttemptError> {
        let lease = self.pool.select().map_err(AttemptError::NoCredential)?;

        let validator = if request.is_cacheable() {
            self.cache.validator_for(&request)
        } else {
            None
        };
        let conditional = validator.is_some();
        let outbound = match validator {
            Some(etag) => request.with_header("if-none-match", etag),
            None => request,
        };

        match self.transport.execute(&lease.secret, &outbound).await {
            Ok(response) => {
                self.account_usage(&lease, &response);
                if response.is_success() || response.is_not_modified() {
                    Ok(Exchange {
                        response,
                        credential: lease.label,
                        conditional,
                    })
                } else {
                    let err = TransportError::from_status(response.status, response.body_text());
                    self.account_error(&lease, &err);
                    Err(AttemptError::Transport(err))
                }
            }
            Err(err) => {
                self.account_error(&lease, &err);
                Err(AttemptError::Transport(err))
            }
        }
    }

    /// Turn a successful exchange into the submitter's answer, updating the cache
    fn settle(
        &self,
        request: &RequestDescriptor,
        exchange: Exchange,
        attempts: u32,
    ) -> SubmitResult {
        let Exchange {
            response,
            credential,
            conditional,
        } = exchange;

        if response.is_not_modified() {
            return match self.cache.revalidate(request, response) {
                Revalidation::NotModified(cached) => Ok(Served {
                    id: None,
                    response: cached,
                    source: ResponseSource::Revalidated,
                    attempts,
                    credential: Some(credential),
                }),
                Revalidation::Refreshed(_) | Revalidation::NotCached => {
                    warn!(endpoint = %request.endpoint, "Not modified, but nothing cached");
                    Err(SubmitError::Rejected {
                        status: Some(304),
                        message: "not modified, but no cached response".to_string(),
                    })
                }
            };
        }

        if request.is_cacheable() {
            if conditional {
                self.cache.revalidate(request, response.clone());
            } else if let Some(evicted) = self.cache.insert(request, response.clone(), None, None) {
                record_cache_eviction();
                debug!(key = evicted.short(), "Cache entry evicted");
            }
            record_cache_size(self.cache.len());
        }

        Ok(Served {
            id: None,
            response,
            source: ResponseSource::Network,
            attempts,
            credential: Some(credential),
        })
    }

    fn account_usage(&self, lease: &CredentialLease, response: &ApiResponse) {
        let outcome = match response.quota() {
            Some(quota) => self.pool.update_usage(lease.id, quota),
            None => self.pool.mark_used(lease.id).map(|()| Vec::new()),
        };
        match outcome {
            Ok(events) => self.publish_all(events),
            Err(e) => warn!(credential = %lease.label, error = %e, "Usage not recorded"),
        }
    }

    fn account_error(&self, lease: &CredentialLease, err: &TransportError) {
        match self.pool.record_error(lease.id, err.kind) {
            Ok(events) => self.publish_all(events),
            Err(e) => warn!(credential = %lease.label, error = %e, "Error not recorded"),
        }
    }

    fn publish_all(&self, events: Vec<PoolEvent>) {
        for event in events {
            self.publish(HealthEvent::Pool(event));
        }
    }

    fn publish(&self, event: HealthEvent) {
        if self.events.send(event).is_err() {
            debug!("Alert bridge stopped, health event dropped");
        }
    }

    #[instrument(name = "dispatcher_maintain", skip(self))]
    fn maintain(&self) -> MaintenanceReport {
        let cleanup = self.cache.cleanup();
        let alert_hashes = self.notifier.cleanup();

        let mut events = self.pool.refresh_expired(Utc::now());
        events.extend(self.pool.recover_all());

        let errors_decayed = match self.pool.settings().error_decay_interval() {
            Some(every) => {
                let now = Instant::now();
                let mut last = self.decay.lock();
                let due = last.is_none_or(|at| now.saturating_duration_since(at) >= every);
                if due {
                    *last = Some(now);
                    events.extend(self.pool.decay_errors());
                }
                due
            }
            None => false,
        };

        let recovered = events
            .iter()
            .filter(|e| matches!(e, PoolEvent::CredentialRecovered { .. }))
            .count();
        self.publish_all(events);
        self.export_gauges();

        let report = MaintenanceReport {
            expired_entries: cleanup.expired_entries,
            stale_validators: cleanup.stale_validators,
            dedup_records: cleanup.dedup_records,
            alert_hashes,
            recovered,
            errors_decayed,
        };
        debug!(?report, "Maintenance pass complete");
        report
    }

    fn export_gauges(&self) {
        let status = self.pool.status();
        for cred in &status.credentials {
            record_credential_health(&cred.label, cred.health, cred.active);
        }
        record_pool_status(status.aggregate.status, status.aggregate.average_health);
        record_cache_size(self.cache.len());
    }
}

fn finish_submission(result: &SubmitResult, submitted_at: Instant) {
    let latency_ms = submitted_at.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(served) => {
            record_submission("served");
            record_request_latency_ms(served.source.as_str(), latency_ms);
        }
        Err(e) => {
            record_submission(e.reason());
            record_request_latency_ms(e.reason(), latency_ms);
        }
    }
}

#[instrument(name = "dispatcher_worker_loop", skip_all)]
async fn run_workers<T>(inner: Arc<Inner<T>>, mut shutdown: watch::Receiver<bool>)
where
    T: Transport + Sync + 'static,
{
    let mut in_flight = JoinSet::new();
    debug!("Worker loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = ?e, "Request task panicked");
                }
            }
            active = inner.queue.next() => {
                in_flight.spawn(Arc::clone(&inner).process(active));
            }
        }
    }

    let draining = in_flight.len();
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = ?e, "Request task panicked");
        }
    }
    debug!(drained = draining, "Worker loop stopped");
}

#[instrument(name = "dispatcher_alert_bridge", skip_all)]
async fn run_alert_bridge<T>(
    inner: Arc<Inner<T>>,
    mut events: mpsc::UnboundedReceiver<HealthEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Transport + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => forward(&inner.notifier, event).await,
            _ = shutdown.changed() => break,
        }
    }

    // events published by the last in-flight requests
    while let Ok(event) = events.try_recv() {
        forward(&inner.notifier, event).await;
    }
    debug!("Alert bridge stopped");
}

async fn forward(notifier: &Notifier, event: HealthEvent) {
    if let Some((severity, payload)) = alert_for(&event) {
        notifier.notify(severity, payload).await;
    }
}

#[instrument(name = "dispatcher_maintenance_loop", skip_all)]
async fn run_maintenance<T>(
    inner: Arc<Inner<T>>,
    settings: MonitorSettings,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Transport + Sync + 'static,
{
    let period = settings.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                inner.maintain();
            }
        }
    }
    debug!("Maintenance loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConfig, MockTransport, Scripted};
    use contracts::{CacheSettings, CredentialConfig, QueueSettings};
    use std::time::Duration;

    fn blueprint() -> DispatchBlueprint {
        DispatchBlueprint {
            credentials: vec![
                CredentialConfig::inline("primary", "secret-primary"),
                CredentialConfig::inline("backup", "secret-backup"),
            ],
            queue: QueueSettings {
                base_backoff_ms: 10,
                max_backoff_ms: 100,
                ..QueueSettings::default()
            },
            ..DispatchBlueprint::default()
        }
    }

    async fn dispatcher(config: MockConfig) -> Dispatcher<MockTransport> {
        DispatcherBuilder::new(blueprint(), MockTransport::new(config))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_network_then_cache() {
        let dispatcher = dispatcher(MockConfig::default()).await;
        let request = RequestDescriptor::get("/repos/rust-lang/rust");

        let first = dispatcher.submit(request.clone(), Priority::Normal).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(first.attempts, 1);
        assert!(first.id.is_some());

        let second = dispatcher.submit(request, Priority::Normal).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response, first.response);
        assert_eq!(dispatcher.transport().call_count(), 1);

        let stats = dispatcher.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_revalidates() {
        let mut blueprint = blueprint();
        blueprint.cache = CacheSettings {
            ttl_ms: 1000,
            dedup_window_ms: 100,
            ..CacheSettings::default()
        };
        let dispatcher = DispatcherBuilder::new(blueprint, MockTransport::default())
            .build()
            .await
            .unwrap();
        let request = RequestDescriptor::get("/users/octocat");

        let fresh = dispatcher.submit(request.clone(), Priority::High).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;

        let revalidated = dispatcher.submit(request.clone(), Priority::High).await.unwrap();
        assert_eq!(revalidated.source, ResponseSource::Revalidated);
        assert_eq!(revalidated.response, fresh.response);

        let calls = dispatcher.transport().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].request.header("if-none-match").is_some());

        // restored with a fresh TTL
        let cached = dispatcher.submit(request, Priority::High).await.unwrap();
        assert_eq!(cached.source, ResponseSource::Cache);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_retryable_is_rejected() {
        let dispatcher = dispatcher(MockConfig::default()).await;
        dispatcher
            .transport()
            .script([Scripted::Respond(ApiResponse::new(404, "Not Found"))]);

        let err = dispatcher
            .submit(RequestDescriptor::get("/missing"), Priority::Normal)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SubmitError::Rejected {
                status: Some(404),
                message: "Not Found".to_string()
            }
        );
        assert_eq!(dispatcher.transport().call_count(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let dispatcher = dispatcher(MockConfig {
            failure_rate: 1.0,
            ..MockConfig::default()
        })
        .await;

        let err = dispatcher
            .submit(RequestDescriptor::post("/graphql"), Priority::Critical)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(dispatcher.transport().call_count(), 4);
        assert_eq!(dispatcher.queue_status().stats.total_failed, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_rotates_credential() {
        let dispatcher = dispatcher(MockConfig::default()).await;
        let primary = contracts::SecretHandle::new("secret-primary");
        dispatcher.transport().set_remaining(&primary, 0);

        let served = dispatcher
            .submit(RequestDescriptor::get("/rate_limit"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(served.attempts, 2);
        assert_eq!(served.credential.as_deref(), Some("backup"));

        let status = dispatcher.pool_status();
        assert!(!status.credentials[0].active);
        assert!(status.credentials[1].active);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_healthy_credential() {
        let dispatcher = dispatcher(MockConfig::default()).await;
        for id in 0..2 {
            dispatcher
                .pool()
                .record_error(
                    credential_pool::CredentialId::new(id),
                    contracts::TransportErrorKind::QuotaExceeded,
                )
                .unwrap();
        }

        let err = dispatcher
            .submit(RequestDescriptor::get("/x"), Priority::Low)
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::NoHealthyCredential);
        assert_eq!(dispatcher.transport().call_count(), 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_cancels_queued() {
        let dispatcher = Arc::new(dispatcher(MockConfig::default()).await);
        dispatcher.pause();

        let waiting = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .submit(RequestDescriptor::get("/queued"), Priority::Normal)
                    .await
            })
        };
        while dispatcher.queue_status().lanes.total == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(dispatcher.clear(), 1);
        assert_eq!(waiting.await.unwrap().unwrap_err(), SubmitError::Cancelled);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_does_not_mark_duplicate() {
        let mut blueprint = blueprint();
        blueprint.queue.max_queue_length = 1;
        let dispatcher = Arc::new(
            DispatcherBuilder::new(blueprint, MockTransport::default())
                .build()
                .await
                .unwrap(),
        );
        dispatcher.pause();

        let held = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .submit(RequestDescriptor::post("/one"), Priority::Normal)
                    .await
            })
        };
        while dispatcher.queue_status().lanes.total == 0 {
            tokio::task::yield_now().await;
        }

        let second = RequestDescriptor::post("/two");
        let err = dispatcher
            .submit(second.clone(), Priority::Normal)
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::QueueFull { capacity: 1 });

        dispatcher.clear();
        assert_eq!(held.await.unwrap().unwrap_err(), SubmitError::Cancelled);
        dispatcher.resume();

        let served = dispatcher.submit(second, Priority::Normal).await.unwrap();
        assert_eq!(served.source, ResponseSource::Network);
        assert_eq!(dispatcher.transport().call_count(), 1);
        assert_eq!(dispatcher.cache_stats().deduplicated, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_cancelled() {
        let dispatcher = dispatcher(MockConfig::default()).await;
        dispatcher.shutdown().await;

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            dispatcher.submit(RequestDescriptor::get("/late"), Priority::Normal),
        )
        .await
        .expect("submit must not hang after shutdown");
        assert_eq!(result.unwrap_err(), SubmitError::Cancelled);
        assert_eq!(dispatcher.transport().call_count(), 0);
        assert_eq!(dispatcher.queue_status().lanes.total, 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued() {
        let dispatcher = Arc::new(dispatcher(MockConfig::default()).await);
        dispatcher.pause();

        let waiting = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .submit(RequestDescriptor::get("/queued"), Priority::Low)
                    .await
            })
        };
        while dispatcher.queue_status().lanes.total == 0 {
            tokio::task::yield_now().await;
        }

        dispatcher.shutdown().await;
        assert_eq!(waiting.await.unwrap().unwrap_err(), SubmitError::Cancelled);
    }

    #[tokio::test]
    async fn test_maintenance_recovers_credentials() {
        let dispatcher = dispatcher(MockConfig::default()).await;
        dispatcher
            .pool()
            .record_error(
                credential_pool::CredentialId::new(0),
                contracts::TransportErrorKind::QuotaExceeded,
            )
            .unwrap();

        let report = dispatcher.maintain();
        assert_eq!(report.recovered, 1);
        assert!(!report.errors_decayed);
        assert!(dispatcher.pool_status().credentials[0].active);
        dispatcher.shutdown().await;
    }
}
