//! Notifier - deduplicated fan-out of alerts to every channel

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    AlertMessage, AlertSeverity, BackoffPolicy, ChannelConfig, ChannelType, NotificationSettings,
};
use observability::record_alert;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::channels::{FileChannel, LogChannel, NetworkChannel, WebhookChannel};
use crate::error::NotifierError;
use crate::handle::{ChannelHandle, DeliveryResult};
use crate::metrics::ChannelMetricsSnapshot;

/// Content hash of an alert: SHA-256 over `{"type": severity, "data": payload}`
///
/// Object keys serialise in sorted order, so equal payloads hash equally
/// whatever order they were built in.
pub fn alert_hash(severity: AlertSeverity, payload: &Value) -> String {
    let canonical = json!({ "type": severity.as_str(), "data": payload });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// A sent alert with its per-channel results
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub hash: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<DeliveryResult>,
}

impl AlertRecord {
    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn all_delivered(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

#[derive(Debug, Clone)]
pub enum NotifyOutcome {
    /// An identical alert went out within the dedup window
    Deduped { hash: String },
    Sent(AlertRecord),
}

impl NotifyOutcome {
    pub fn is_deduped(&self) -> bool {
        matches!(self, NotifyOutcome::Deduped { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifierStats {
    pub sent: u64,
    pub deduped: u64,
    /// Hashes still inside the dedup window bookkeeping
    pub dedup_cache_len: usize,
    pub channels: Vec<(String, ChannelMetricsSnapshot)>,
}

struct NotifierState {
    recent: HashMap<String, Instant>,
    history: HeapRb<AlertRecord>,
    sent: u64,
    deduped: u64,
}

pub struct Notifier {
    handles: Vec<ChannelHandle>,
    state: Mutex<NotifierState>,
    dedup_window: Duration,
}

impl Notifier {
    /// Create a notifier over already running channel handles
    pub fn with_handles(handles: Vec<ChannelHandle>, settings: &NotificationSettings) -> Self {
        Self {
            handles,
            state: Mutex::new(NotifierState {
                recent: HashMap::new(),
                history: HeapRb::new(settings.max_history.max(1)),
                sent: 0,
                deduped: 0,
            }),
            dedup_window: settings.dedup_window(),
        }
    }

    /// Send an alert to every channel unless an identical one went out
    /// within the dedup window
    ///
    /// Channels run concurrently; the call returns once each has settled,
    /// retries included. Channel failures only show up in the record.
    #[instrument(name = "notifier_notify", skip(self, payload), fields(severity = %severity))]
    pub async fn notify(&self, severity: AlertSeverity, payload: Value) -> NotifyOutcome {
        let hash = alert_hash(severity, &payload);
        let now = Instant::now();

        {
            let mut state = self.state.lock();
            let within_window = state
                .recent
                .get(&hash)
                .is_some_and(|seen| now.saturating_duration_since(*seen) < self.dedup_window);
            if within_window {
                state.deduped += 1;
                drop(state);
                record_alert(severity, true);
                debug!(hash = %&hash[..12], "Alert deduplicated");
                return NotifyOutcome::Deduped { hash };
            }
            state.recent.insert(hash.clone(), now);
        }

        let message = Arc::new(AlertMessage::new(severity, payload, hash));
        let pending: Vec<_> = self
            .handles
            .iter()
            .map(|handle| handle.try_deliver(Arc::clone(&message)))
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for delivery in pending {
            results.push(delivery.settle().await);
        }

        let record = AlertRecord {
            hash: message.hash.clone(),
            severity,
            title: message.title.clone(),
            payload: message.payload.clone(),
            timestamp: message.timestamp,
            results,
        };

        let delivered = record.delivered();
        if record.all_delivered() {
            info!(channels = record.results.len(), "Alert sent");
        } else {
            warn!(
                channels = record.results.len(),
                delivered, "Alert partially delivered"
            );
        }
        record_alert(severity, false);

        let mut state = self.state.lock();
        state.sent += 1;
        state.history.push_overwrite(record.clone());
        NotifyOutcome::Sent(record)
    }

    /// Forget hashes older than the dedup window; returns how many were dropped
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.recent.len();
        let window = self.dedup_window;
        state
            .recent
            .retain(|_, seen| now.saturating_duration_since(*seen) < window);
        let removed = before - state.recent.len();
        if removed > 0 {
            debug!(removed, "Alert dedup cache cleaned");
        }
        removed
    }

    /// Recently sent alerts, newest first
    pub fn history(&self, limit: usize) -> Vec<AlertRecord> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> NotifierStats {
        let state = self.state.lock();
        NotifierStats {
            sent: state.sent,
            deduped: state.deduped,
            dedup_cache_len: state.recent.len(),
            channels: self
                .handles
                .iter()
                .map(|h| (h.name().to_string(), h.metrics().snapshot()))
                .collect(),
        }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.handles.iter().map(ChannelHandle::name).collect()
    }

    /// Stop every channel worker after its queued alerts
    #[instrument(name = "notifier_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        for handle in &self.handles {
            handle.shutdown().await;
        }
        info!(channels = self.handles.len(), "Notifier shutdown complete");
    }
}

/// Builds a [`Notifier`] from [`NotificationSettings`]
pub struct NotifierBuilder {
    settings: NotificationSettings,
    extra: Vec<ChannelHandle>,
}

impl NotifierBuilder {
    pub fn new(settings: NotificationSettings) -> Self {
        Self {
            settings,
            extra: Vec::new(),
        }
    }

    /// Add a channel next to the configured ones
    ///
    /// Spawns its worker immediately, so call inside a tokio runtime.
    pub fn with_channel<C>(mut self, channel: C, queue_capacity: usize) -> Self
    where
        C: contracts::NotificationChannel + 'static,
    {
        let policy = self.settings.backoff_policy();
        self.extra
            .push(ChannelHandle::spawn(channel, queue_capacity, policy));
        self
    }

    #[instrument(
        name = "notifier_builder_build",
        skip(self),
        fields(channel_count = self.settings.channels.len())
    )]
    pub async fn build(self) -> Result<Notifier, NotifierError> {
        let policy = self.settings.backoff_policy();
        let mut handles = Vec::with_capacity(self.settings.channels.len() + self.extra.len());
        for config in &self.settings.channels {
            handles.push(create_channel_handle(config, policy).await?);
        }
        handles.extend(self.extra);

        Ok(Notifier::with_handles(handles, &self.settings))
    }
}

#[instrument(
    name = "notifier_create_channel_handle",
    skip(config, policy),
    fields(channel = %config.name, channel_type = ?config.channel_type)
)]
async fn create_channel_handle(
    config: &ChannelConfig,
    policy: BackoffPolicy,
) -> Result<ChannelHandle, NotifierError> {
    match config.channel_type {
        ChannelType::Log => {
            let channel = LogChannel::new(&config.name);
            Ok(ChannelHandle::spawn(channel, config.queue_capacity, policy))
        }
        ChannelType::File => {
            let channel = FileChannel::from_params(&config.name, &config.params)
                .map_err(|e| NotifierError::channel_creation(&config.name, e.to_string()))?;
            Ok(ChannelHandle::spawn(channel, config.queue_capacity, policy))
        }
        ChannelType::Network => {
            let channel = NetworkChannel::from_params(&config.name, &config.params)
                .await
                .map_err(|e| NotifierError::channel_creation(&config.name, e.to_string()))?;
            Ok(ChannelHandle::spawn(channel, config.queue_capacity, policy))
        }
        ChannelType::Webhook => {
            let channel = WebhookChannel::from_params(&config.name, &config.params)
                .map_err(|e| NotifierError::channel_creation(&config.name, e.to_string()))?;
            Ok(ChannelHandle::spawn(channel, config.queue_capacity, policy))
        }
    }
}
