//! VibeMap - declarative MQTT to asset model mapping
//!
//! Maps messages arriving on MQTT topics onto platform documents
//! (measurements, events, alarms, inventory) as described by mapping
//! definitions, and maps platform events back onto broker publishes.

pub mod config;
pub mod connector;
pub mod mapping;
pub mod platform;
pub mod processor;
pub mod subscription;
pub mod substitution;
pub mod topic;

pub use config::Config;
pub use connector::{ConnectorClient, ConnectorManager, ConnectorStatus};
pub use mapping::{Mapping, MappingStore};
pub use processor::{Pipeline, ProcessingContext};
