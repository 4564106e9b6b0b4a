//! # Notifier
//!
//! Fans alerts out to notification channels with content-hash
//! deduplication.
//!
//! Every channel runs behind a [`ChannelHandle`]: a bounded queue and a
//! worker task that retries failed sends with exponential backoff. A slow
//! or failing channel never blocks the others.
//!
//! ## Usage
//!
//! ```ignore
//! let notifier = NotifierBuilder::new(settings).build().await?;
//! notifier.notify(AlertSeverity::Critical, json!({"remaining": 3})).await;
//! notifier.shutdown().await;
//! ```

pub mod channels;
mod error;
mod handle;
mod metrics;
mod notifier;

pub use channels::{
    FileChannel, FileChannelConfig, LogChannel, NetworkChannel, NetworkChannelConfig,
    WebhookChannel, WebhookChannelConfig, WebhookFormat,
};
pub use error::NotifierError;
pub use handle::{ChannelHandle, DeliveryResult, PendingDelivery};
pub use metrics::{ChannelMetrics, ChannelMetricsSnapshot};
pub use notifier::{alert_hash, AlertRecord, Notifier, NotifierBuilder, NotifierStats, NotifyOutcome};
