//! NetworkChannel - one UDP datagram per alert

use std::collections::HashMap;
use std::net::SocketAddr;

use contracts::{AlertMessage, ContractError, NotificationChannel};
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

/// Largest payload sent in a single IPv4 UDP datagram
const DEFAULT_MAX_PACKET_SIZE: usize = 65_000;

#[derive(Debug, Clone)]
pub struct NetworkChannelConfig {
    pub addr: SocketAddr,
    pub max_packet_size: usize,
}

impl NetworkChannelConfig {
    /// Read `addr` (required) and `max_packet_size`
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr_str = params
            .get("addr")
            .ok_or_else(|| "missing 'addr' parameter".to_string())?;
        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|e| format!("invalid address '{}': {}", addr_str, e))?;

        let max_packet_size = match params.get("max_packet_size") {
            Some(raw) => raw
                .parse()
                .map_err(|e| format!("invalid max_packet_size '{}': {}", raw, e))?,
            None => DEFAULT_MAX_PACKET_SIZE,
        };

        Ok(Self {
            addr,
            max_packet_size,
        })
    }
}

/// Channel that sends the JSON alert over UDP
pub struct NetworkChannel {
    name: String,
    config: NetworkChannelConfig,
    socket: Option<UdpSocket>,
}

impl NetworkChannel {
    #[instrument(name = "network_channel_new", skip(name, config), fields(target = %config.addr))]
    pub async fn new(
        name: impl Into<String>,
        config: NetworkChannelConfig,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let bind = if config.addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(config.addr).await?;

        debug!(channel = %name, "NetworkChannel connected");
        Ok(Self {
            name,
            config,
            socket: Some(socket),
        })
    }

    pub async fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = NetworkChannelConfig::from_params(params)
            .map_err(|e| ContractError::channel_connection(&name, e))?;
        Self::new(name.clone(), config)
            .await
            .map_err(|e| ContractError::channel_connection(&name, e.to_string()))
    }

    fn encode(&self, message: &AlertMessage) -> Result<Vec<u8>, ContractError> {
        let data = serde_json::to_vec(message)
            .map_err(|e| ContractError::channel_send(&self.name, format!("json error: {e}")))?;
        if data.len() > self.config.max_packet_size {
            return Err(ContractError::channel_send(
                &self.name,
                format!(
                    "alert of {} bytes exceeds max packet size {}",
                    data.len(),
                    self.config.max_packet_size
                ),
            ));
        }
        Ok(data)
    }
}

impl NotificationChannel for NetworkChannel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "network_channel_send",
        skip(self, message),
        fields(channel = %self.name, severity = %message.severity)
    )]
    async fn send(&mut self, message: &AlertMessage) -> Result<(), ContractError> {
        let data = self.encode(message)?;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ContractError::channel_send(&self.name, "socket not connected"))?;

        let sent = socket
            .send(&data)
            .await
            .map_err(|e| ContractError::channel_send(&self.name, e.to_string()))?;
        debug!(bytes = sent, "Alert datagram sent");
        Ok(())
    }

    #[instrument(name = "network_channel_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.socket = None;
        debug!(channel = %self.name, "NetworkChannel closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::AlertSeverity;
    use serde_json::json;

    #[test]
    fn test_config_parsing() {
        let mut params = HashMap::new();
        params.insert("addr".to_string(), "127.0.0.1:9999".to_string());
        let config = NetworkChannelConfig::from_params(&params).unwrap();
        assert_eq!(config.addr.port(), 9999);
        assert_eq!(config.max_packet_size, DEFAULT_MAX_PACKET_SIZE);

        params.insert("addr".to_string(), "not-an-addr".to_string());
        assert!(NetworkChannelConfig::from_params(&params).is_err());
        assert!(NetworkChannelConfig::from_params(&HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_alert_reaches_receiver() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = NetworkChannelConfig {
            addr: receiver.local_addr().unwrap(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        };
        let mut channel = NetworkChannel::new("udp", config).await.unwrap();

        let message = AlertMessage::new(AlertSeverity::Rotation, json!({"to": "cred-1"}), "abc");
        channel.send(&message).await.unwrap();

        let mut buf = vec![0u8; 65_536];
        let len = receiver.recv(&mut buf).await.unwrap();
        let received: AlertMessage = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_oversized_alert_fails() {
        let config = NetworkChannelConfig {
            addr: "127.0.0.1:19997".parse().unwrap(),
            max_packet_size: 16,
        };
        let mut channel = NetworkChannel::new("tiny", config).await.unwrap();
        let message = AlertMessage::new(AlertSeverity::Error, json!({"error": "boom"}), "h");
        assert!(channel.send(&message).await.is_err());

        channel.close().await.unwrap();
    }
}
