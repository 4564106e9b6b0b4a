//! Built-in notification channels

mod file;
mod log;
mod network;
mod webhook;

pub use file::{FileChannel, FileChannelConfig};
pub use log::LogChannel;
pub use network::{NetworkChannel, NetworkChannelConfig};
pub use webhook::{webhook_body, WebhookChannel, WebhookChannelConfig, WebhookFormat};
