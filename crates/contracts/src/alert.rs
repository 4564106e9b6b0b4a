//! Alert types - Notifier input/output

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Alert severity class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Quota running low
    Warning,
    /// Quota (nearly) exhausted
    Critical,
    /// Quota window reset / health restored
    Reset,
    /// Credential rotation
    Rotation,
    /// Error report
    Error,
}

impl AlertSeverity {
    /// Lower-case name
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Reset => "reset",
            AlertSeverity::Rotation => "rotation",
            AlertSeverity::Error => "error",
        }
    }

    /// Human-readable title
    pub fn title(self) -> &'static str {
        match self {
            AlertSeverity::Warning => "Rate Limit Warning",
            AlertSeverity::Critical => "Critical Rate Limit Alert",
            AlertSeverity::Reset => "Rate Limit Reset",
            AlertSeverity::Rotation => "Credential Rotation",
            AlertSeverity::Error => "Error Alert",
        }
    }

    /// RGB colour used by chat-style channels
    pub fn color(self) -> u32 {
        match self {
            AlertSeverity::Warning => 0xFFA500,
            AlertSeverity::Critical => 0xFF0000,
            AlertSeverity::Reset => 0x00FF00,
            AlertSeverity::Rotation => 0x0099FF,
            AlertSeverity::Error => 0xFF4500,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            "reset" => Ok(AlertSeverity::Reset),
            "rotation" => Ok(AlertSeverity::Rotation),
            "error" => Ok(AlertSeverity::Error),
            _ => Err(ContractError::invalid_value("severity", s)),
        }
    }
}

/// Formatted alert delivered to every channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    /// Severity class
    pub severity: AlertSeverity,
    /// Title derived from the severity
    pub title: String,
    /// Colour derived from the severity
    pub color: u32,
    /// Structured payload
    pub payload: serde_json::Value,
    /// Content hash over (severity, payload)
    pub hash: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl AlertMessage {
    /// Build a message from its parts
    pub fn new(severity: AlertSeverity, payload: serde_json::Value, hash: impl Into<String>) -> Self {
        Self {
            severity,
            title: severity.title().to_string(),
            color: severity.color(),
            payload,
            hash: hash.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_derives_title_and_color() {
        let msg = AlertMessage::new(AlertSeverity::Critical, serde_json::json!({"remaining": 3}), "h");
        assert_eq!(msg.title, "Critical Rate Limit Alert");
        assert_eq!(msg.color, 0xFF0000);
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!("Rotation".parse::<AlertSeverity>().unwrap(), AlertSeverity::Rotation);
        assert!("panic".parse::<AlertSeverity>().is_err());
    }
}
