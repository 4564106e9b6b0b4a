//! DispatchBlueprint - Config Loader output
//!
//! Describes the complete dispatcher configuration: credentials, pool policy,
//! queue limits, cache sizing, notification routing and maintenance cadence.
//! Every section is optional and defaults to the reference behaviour.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{BackoffPolicy, SecretHandle};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete dispatcher configuration blueprint
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct DispatchBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Credential definitions (pool size is fixed at construction)
    #[serde(default)]
    #[validate(nested)]
    pub credentials: Vec<CredentialConfig>,

    /// Credential pool policy
    #[serde(default)]
    #[validate(nested)]
    pub pool: PoolSettings,

    /// Dispatch queue limits and retry policy
    #[serde(default)]
    #[validate(nested)]
    pub queue: QueueSettings,

    /// Response cache and dedup window
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,

    /// Alert routing
    #[serde(default)]
    #[validate(nested)]
    pub notifications: NotificationSettings,

    /// Periodic maintenance task
    #[serde(default)]
    #[validate(nested)]
    pub monitor: MonitorSettings,
}

/// One credential
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CredentialConfig {
    /// Unique label
    #[validate(length(min = 1))]
    pub id: String,

    /// Inline secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretHandle>,

    /// Environment variable holding the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,

    /// Quota assumed until the first response reports the real one
    #[serde(default = "default_initial_limit")]
    #[validate(range(min = 1))]
    pub initial_limit: u64,
}

fn default_initial_limit() -> u64 {
    5000
}

impl CredentialConfig {
    /// Credential with an inline secret
    pub fn inline(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: Some(SecretHandle::new(secret)),
            secret_env: None,
            initial_limit: default_initial_limit(),
        }
    }
}

/// Credential pool policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PoolSettings {
    /// A disabled credential is reactivated only when `error_count` is below this
    pub recovery_error_threshold: u32,

    /// Selection requires `health > min_health`
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_health: f64,

    /// Rotation history ring size
    #[validate(range(min = 1))]
    pub rotation_history: usize,

    /// Forget one error per credential every interval (0 = never)
    pub error_decay_interval_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            recovery_error_threshold: 5,
            min_health: 10.0,
            rotation_history: 100,
            error_decay_interval_ms: 0,
        }
    }
}

impl PoolSettings {
    /// Error decay interval, if enabled
    pub fn error_decay_interval(&self) -> Option<Duration> {
        (self.error_decay_interval_ms > 0)
            .then(|| Duration::from_millis(self.error_decay_interval_ms))
    }
}

/// Dispatch queue limits
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QueueSettings {
    /// In-flight execution cap
    #[validate(range(min = 1))]
    pub max_concurrent: usize,

    /// Re-executions allowed after the first attempt
    pub max_retries: u32,

    /// First retry delay
    pub base_backoff_ms: u64,

    /// Retry delay ceiling
    pub max_backoff_ms: u64,

    /// Queued entries allowed across all lanes
    #[validate(range(min = 1))]
    pub max_queue_length: usize,

    /// Completed-entry history ring size
    #[validate(range(min = 1))]
    pub max_history: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            max_queue_length: 10_000,
            max_history: 1000,
        }
    }
}

impl QueueSettings {
    /// Retry policy derived from this section
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_millis(self.base_backoff_ms, self.max_backoff_ms, self.max_retries)
    }
}

/// Response cache and dedup window
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheSettings {
    /// Default entry TTL
    pub ttl_ms: u64,

    /// Entry count bound
    #[validate(range(min = 1))]
    pub max_size: usize,

    /// Identical requests inside this window are rejected as duplicates
    pub dedup_window_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            max_size: 1000,
            dedup_window_ms: 5000,
        }
    }
}

impl CacheSettings {
    /// Default TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Dedup window as a duration
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// Alert routing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NotificationSettings {
    /// Identical alerts inside this window are suppressed
    pub dedup_window_ms: u64,

    /// Re-sends allowed per channel after the first attempt
    pub max_retries: u32,

    /// First retry delay
    pub base_backoff_ms: u64,

    /// Retry delay ceiling
    pub max_backoff_ms: u64,

    /// Alert history ring size
    #[validate(range(min = 1))]
    pub max_history: usize,

    /// Output channels
    #[validate(nested)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            dedup_window_ms: 300_000,
            max_retries: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            max_history: 500,
            channels: Vec::new(),
        }
    }
}

impl NotificationSettings {
    /// Per-channel retry policy
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_millis(self.base_backoff_ms, self.max_backoff_ms, self.max_retries)
    }

    /// Dedup window as a duration
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// Channel output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChannelConfig {
    /// Channel name
    #[validate(length(min = 1))]
    pub name: String,

    /// Channel type
    pub channel_type: ChannelType,

    /// Worker queue capacity
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// tracing output
    Log,
    /// JSON-lines file output
    File,
    /// UDP datagram output
    Network,
    /// HTTP webhook (Slack, Discord or plain JSON)
    Webhook,
}

/// Periodic maintenance task
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorSettings {
    /// Period between maintenance passes
    #[validate(range(min = 1))]
    pub interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self { interval_ms: 30_000 }
    }
}

impl MonitorSettings {
    /// Period as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
