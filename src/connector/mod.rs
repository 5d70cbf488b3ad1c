//! Broker Connectors
//!
//! A connector holds the session to one MQTT broker. It subscribes the
//! topics of the active inbound mappings, runs every received message
//! through the processing pipeline and acknowledges it once the platform
//! requests are done. Outbound platform events are published back to the
//! broker.
//!
//! # Example Configuration
//!
//! ```toml
//! [[connector]]
//! name = "edge"
//! address = "broker.local:1883"
//! client_id = "vibemap-edge"
//! username = "bridge"
//! password = "${BROKER_PASSWORD}"
//! reconnect_interval = 5
//! max_reconnect_interval = 60
//! operation_timeout = "10s"
//! ```

mod client;
mod manager;
mod memory;
mod mqtt;
mod transport;

pub use client::ConnectorClient;
pub use manager::ConnectorManager;
pub use memory::{MemoryTransport, PublishedMessage, TransportCall};
pub use mqtt::MqttTransport;
pub use transport::{
    ConnectorError, ConnectorStatus, InboundMessage, Transport, TransportEvent, TransportEvents,
};

pub use crate::config::ConnectorConfig;
