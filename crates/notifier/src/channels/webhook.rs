//! WebhookChannel - HTTP POST of the alert to a chat or generic webhook
//!
//! Slack and Discord receive an attachment / embed carrying the severity
//! title and colour, one field per top-level payload key. The `json` format
//! posts the `AlertMessage` as is.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use contracts::{AlertMessage, ContractError, NotificationChannel};
use serde_json::{json, Value};
use tracing::{debug, instrument};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Body layout expected by the receiving end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    Slack,
    Discord,
    Json,
}

impl FromStr for WebhookFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slack" => Ok(WebhookFormat::Slack),
            "discord" => Ok(WebhookFormat::Discord),
            "json" => Ok(WebhookFormat::Json),
            other => Err(format!("unknown webhook format '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookChannelConfig {
    pub url: String,
    pub format: WebhookFormat,
    pub timeout: Duration,
}

impl WebhookChannelConfig {
    /// Read `url` (required, http or https), `format` and `timeout_ms`
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let url = params
            .get("url")
            .map(|u| u.trim().to_string())
            .ok_or_else(|| "missing 'url' parameter".to_string())?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("invalid webhook url '{url}'"));
        }

        let format = match params.get("format") {
            Some(raw) => raw.parse()?,
            None => WebhookFormat::Json,
        };

        let timeout_ms = match params.get("timeout_ms") {
            Some(raw) => raw
                .parse()
                .map_err(|e| format!("invalid timeout_ms '{}': {}", raw, e))?,
            None => DEFAULT_TIMEOUT_MS,
        };

        Ok(Self {
            url,
            format,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Request body for `format`
pub fn webhook_body(format: WebhookFormat, message: &AlertMessage) -> Value {
    match format {
        WebhookFormat::Slack => json!({
            "attachments": [{
                "color": format!("#{:06X}", message.color),
                "title": message.title,
                "fields": fields(message, "title", "short"),
                "ts": message.timestamp.timestamp(),
            }]
        }),
        WebhookFormat::Discord => json!({
            "embeds": [{
                "color": message.color,
                "title": message.title,
                "fields": fields(message, "name", "inline"),
                "timestamp": message.timestamp.to_rfc3339(),
            }]
        }),
        WebhookFormat::Json => json!(message),
    }
}

fn fields(message: &AlertMessage, label_key: &str, compact_key: &str) -> Vec<Value> {
    let Some(object) = message.payload.as_object() else {
        return vec![json!({
            label_key: "details",
            "value": message.payload.to_string(),
            compact_key: false,
        })];
    };
    object
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({ label_key: key, "value": text, compact_key: true })
        })
        .collect()
}

/// Channel that posts alerts to a webhook URL
pub struct WebhookChannel {
    name: String,
    config: WebhookChannelConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, config: WebhookChannelConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ContractError::channel_connection(&name, e.to_string()))?;
        debug!(channel = %name, format = ?config.format, "WebhookChannel ready");
        Ok(Self {
            name,
            config,
            client,
        })
    }

    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = WebhookChannelConfig::from_params(params)
            .map_err(|e| ContractError::channel_connection(&name, e))?;
        Self::new(name, config)
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "webhook_channel_send",
        skip(self, message),
        fields(channel = %self.name, severity = %message.severity)
    )]
    async fn send(&mut self, message: &AlertMessage) -> Result<(), ContractError> {
        let body = webhook_body(self.config.format, message);
        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ContractError::channel_send(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ContractError::channel_send(
                &self.name,
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }
        debug!(status = status.as_u16(), "Webhook accepted alert");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::AlertSeverity;

    fn message() -> AlertMessage {
        AlertMessage::new(
            AlertSeverity::Critical,
            json!({ "credential": "primary", "health": 5.0 }),
            "h",
        )
    }

    #[test]
    fn test_config_parsing() {
        let mut params = HashMap::new();
        assert!(WebhookChannelConfig::from_params(&params).is_err());

        params.insert("url".to_string(), "ftp://example.com".to_string());
        assert!(WebhookChannelConfig::from_params(&params).is_err());

        params.insert("url".to_string(), "https://hooks.slack.com/services/T/B/X".to_string());
        let config = WebhookChannelConfig::from_params(&params).unwrap();
        assert_eq!(config.format, WebhookFormat::Json);
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));

        params.insert("format".to_string(), "Discord".to_string());
        params.insert("timeout_ms".to_string(), "250".to_string());
        let config = WebhookChannelConfig::from_params(&params).unwrap();
        assert_eq!(config.format, WebhookFormat::Discord);
        assert_eq!(config.timeout, Duration::from_millis(250));

        params.insert("format".to_string(), "teams".to_string());
        assert!(WebhookChannelConfig::from_params(&params).is_err());
    }

    #[test]
    fn test_slack_attachment() {
        let msg = message();
        let body = webhook_body(WebhookFormat::Slack, &msg);
        let attachment = &body["attachments"][0];
        assert_eq!(attachment["color"], "#FF0000");
        assert_eq!(attachment["title"], "Critical Rate Limit Alert");
        assert_eq!(attachment["ts"], json!(msg.timestamp.timestamp()));
        assert_eq!(
            attachment["fields"],
            json!([
                { "title": "credential", "value": "primary", "short": true },
                { "title": "health", "value": "5.0", "short": true },
            ])
        );
    }

    #[test]
    fn test_discord_embed() {
        let body = webhook_body(WebhookFormat::Discord, &message());
        let embed = &body["embeds"][0];
        assert_eq!(embed["color"], json!(0xFF0000));
        assert_eq!(embed["title"], "Critical Rate Limit Alert");
        assert_eq!(embed["fields"][0], json!({ "name": "credential", "value": "primary", "inline": true }));
    }

    #[test]
    fn test_non_object_payload_single_field() {
        let msg = AlertMessage::new(AlertSeverity::Error, json!("boom"), "h");
        let body = webhook_body(WebhookFormat::Slack, &msg);
        assert_eq!(
            body["attachments"][0]["fields"],
            json!([{ "title": "details", "value": "\"boom\"", "short": false }])
        );
        let plain = webhook_body(WebhookFormat::Json, &msg);
        assert_eq!(plain["severity"], "error");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        let config = WebhookChannelConfig {
            url: "http://127.0.0.1:1/hook".to_string(),
            format: WebhookFormat::Slack,
            timeout: Duration::from_millis(500),
        };
        let mut channel = WebhookChannel::new("hook", config).unwrap();
        let err = channel.send(&message()).await.unwrap_err();
        assert!(err.to_string().contains("hook"));
        channel.close().await.unwrap();
    }
}
