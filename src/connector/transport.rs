//! Broker Transport Abstraction
//!
//! Trait for the MQTT client underneath a connector, implemented over
//! rumqttc for real brokers and in memory for tests.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// Error type for connector operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Operation requires a live connection
    NotConnected,
    /// Connection to the broker failed or was lost
    ConnectionLost(String),
    /// Broker rejected the operation
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Request queue is full
    QueueFull,
    /// Invalid configuration
    InvalidConfig(String),
    /// Other error
    Other(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::NotConnected => write!(f, "Not connected"),
            ConnectorError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            ConnectorError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            ConnectorError::Timeout => write!(f, "Operation timed out"),
            ConnectorError::QueueFull => write!(f, "Request queue full"),
            ConnectorError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            ConnectorError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Status of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    /// Not connected, will attempt to connect
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and operational
    Connected,
    /// Connection failed, backing off before retry
    Backoff,
    /// Permanently failed, will not retry
    Failed,
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectorStatus::Disconnected => "disconnected",
            ConnectorStatus::Connecting => "connecting",
            ConnectorStatus::Connected => "connected",
            ConnectorStatus::Backoff => "backoff",
            ConnectorStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A message delivered by the broker
#[derive(Debug)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
    /// Fired once the message has been fully processed
    pub ack: Option<oneshot::Sender<()>>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: Bytes, qos: u8) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            retain: false,
            ack: None,
        }
    }

    /// Acknowledge the message to the broker
    pub fn ack(&mut self) {
        if let Some(tx) = self.ack.take() {
            let _ = tx.send(());
        }
    }
}

/// Events emitted by a transport after `connect`
#[derive(Debug)]
pub enum TransportEvent {
    /// Session established
    Connected { uri: String },
    /// Session ended; the event stream closes afterwards
    Disconnected { code: Option<u8>, reason: String },
    Message(InboundMessage),
    /// Non-fatal error
    Error(String),
}

pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// MQTT client operations used by connectors and the subscription registry
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session and return its event stream
    async fn connect(&self) -> Result<TransportEvents, ConnectorError>;

    async fn disconnect(&self) -> Result<(), ConnectorError>;

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), ConnectorError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), ConnectorError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: u8,
        retain: bool,
    ) -> Result<(), ConnectorError>;

    fn is_connected(&self) -> bool;
}
