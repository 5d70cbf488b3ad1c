//! Connector Configuration
//!
//! Configuration for connections to the MQTT brokers that mappings
//! subscribe on and publish to.

use std::time::Duration;

use serde::Deserialize;

/// Default MQTT port when the address carries none
pub const DEFAULT_PORT: u16 = 1883;

/// Configuration for a single broker connection
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Unique name for this connector
    pub name: String,

    /// Broker address (host:port or just host)
    pub address: String,

    /// Client ID to use when connecting
    #[serde(default = "default_client_id")]
    pub client_id: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,

    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Reconnect interval in seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,

    /// Maximum reconnect interval in seconds (for exponential backoff)
    #[serde(default = "default_max_reconnect_interval")]
    pub max_reconnect_interval: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Timeout for subscribe, unsubscribe and publish
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Capacity of the client request channel
    #[serde(default = "default_inflight")]
    pub inflight: usize,
}

fn default_client_id() -> String {
    format!("vibemap-{}", std::process::id())
}

fn default_keepalive() -> u16 {
    60
}

fn default_true() -> bool {
    true
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_max_reconnect_interval() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_inflight() -> usize {
    100
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            address: "localhost:1883".to_string(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keepalive: default_keepalive(),
            clean_session: true,
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
            connect_timeout: default_connect_timeout(),
            operation_timeout: default_operation_timeout(),
            enabled: true,
            inflight: default_inflight(),
        }
    }
}

impl ConnectorConfig {
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    pub fn max_reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Parse address into host and port
    pub fn parse_address(&self) -> (String, u16) {
        if let Some((host, port_str)) = self.address.rsplit_once(':') {
            if let Ok(port) = port_str.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
        (self.address.clone(), DEFAULT_PORT)
    }

    /// Address as shown in logs and connect events
    pub fn uri(&self) -> String {
        let (host, port) = self.parse_address();
        format!("mqtt://{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let config = ConnectorConfig {
            address: "broker.example.com:8883".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_address(), ("broker.example.com".to_string(), 8883));
        assert_eq!(config.uri(), "mqtt://broker.example.com:8883");

        let config = ConnectorConfig {
            address: "broker.example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_address().1, DEFAULT_PORT);
    }

    #[test]
    fn test_durations() {
        let config = ConnectorConfig::default();
        assert_eq!(config.reconnect_interval_duration(), Duration::from_secs(5));
        assert_eq!(config.max_reconnect_interval_duration(), Duration::from_secs(60));
        assert_eq!(config.operation_timeout, Duration::from_secs(10));
    }
}
