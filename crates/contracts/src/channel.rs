//! NotificationChannel trait - Notifier output interface
//!
//! Defines the abstract interface for alert channels.

use crate::{AlertMessage, ContractError};

/// Alert output trait
///
/// All channel implementations must implement this trait.
#[trait_variant::make(NotificationChannel: Send)]
pub trait LocalNotificationChannel {
    /// Channel name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one alert
    ///
    /// # Errors
    /// Returns send error (should include context)
    async fn send(&mut self, message: &AlertMessage) -> Result<(), ContractError>;

    /// Close channel
    async fn close(&mut self) -> Result<(), ContractError>;
}
