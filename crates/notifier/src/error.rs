//! Notifier error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifierError {
    /// Channel could not be built from its configuration
    #[error("failed to create channel '{name}': {message}")]
    ChannelCreation { name: String, message: String },

    #[error("channel error: {0}")]
    Contract(#[from] contracts::ContractError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NotifierError {
    pub fn channel_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChannelCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
