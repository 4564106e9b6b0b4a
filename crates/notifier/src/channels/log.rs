//! LogChannel - writes alerts through tracing

use contracts::{AlertMessage, AlertSeverity, ContractError, NotificationChannel};
use tracing::{error, info, instrument, warn};

/// Channel that logs alerts, level chosen by severity
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_alert(&self, message: &AlertMessage) {
        let hash = message.hash.get(..12).unwrap_or(&message.hash);
        match message.severity {
            AlertSeverity::Critical | AlertSeverity::Error => error!(
                channel = %self.name,
                severity = %message.severity,
                hash,
                payload = %message.payload,
                "{}",
                message.title
            ),
            AlertSeverity::Warning => warn!(
                channel = %self.name,
                severity = %message.severity,
                hash,
                payload = %message.payload,
                "{}",
                message.title
            ),
            AlertSeverity::Reset | AlertSeverity::Rotation => info!(
                channel = %self.name,
                severity = %message.severity,
                hash,
                payload = %message.payload,
                "{}",
                message.title
            ),
        }
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_channel_send",
        skip(self, message),
        fields(channel = %self.name, severity = %message.severity)
    )]
    async fn send(&mut self, message: &AlertMessage) -> Result<(), ContractError> {
        self.log_alert(message);
        Ok(())
    }

    #[instrument(name = "log_channel_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(channel = %self.name, "LogChannel closed");
        Ok(())
    }
}
