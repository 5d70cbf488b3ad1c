//! Connector Manager
//!
//! Owns every broker connector and fans mapping changes and platform
//! events out to all of them.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info};

use super::client::ConnectorClient;
use super::transport::{ConnectorStatus, Transport};
use crate::config::ConnectorConfig;
use crate::mapping::{Api, Mapping, StoreError};
use crate::processor::{Pipeline, ProcessingContext};
use crate::subscription::SubscriptionChange;

pub struct ConnectorManager {
    connectors: RwLock<Vec<Arc<ConnectorClient>>>,
    pipeline: Arc<Pipeline>,
}

impl ConnectorManager {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            connectors: RwLock::new(Vec::new()),
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Add a connector over the given transport
    pub fn add(&self, config: ConnectorConfig, transport: Arc<dyn Transport>) -> Arc<ConnectorClient> {
        let name = config.name.clone();
        let client = Arc::new(ConnectorClient::new(config, transport, self.pipeline.clone()));
        self.connectors.write().push(client.clone());

        info!("Connector manager: Added connector '{}'", name);
        client
    }

    pub fn get(&self, name: &str) -> Option<Arc<ConnectorClient>> {
        self.connectors
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    fn snapshot(&self) -> Vec<Arc<ConnectorClient>> {
        self.connectors.read().iter().cloned().collect()
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.read().len()
    }

    pub fn connected_count(&self) -> usize {
        self.connectors
            .read()
            .iter()
            .filter(|c| c.status() == ConnectorStatus::Connected)
            .count()
    }

    pub fn status(&self) -> Vec<(String, ConnectorStatus)> {
        self.connectors
            .read()
            .iter()
            .map(|c| (c.name().to_string(), c.status()))
            .collect()
    }

    pub fn start_all(&self) {
        for connector in self.snapshot() {
            if let Err(e) = connector.start() {
                error!("Connector '{}': Failed to start: {}", connector.name(), e);
            }
        }
    }

    pub async fn stop_all(&self) {
        for connector in self.snapshot() {
            if let Err(e) = connector.stop().await {
                error!("Connector '{}': Failed to stop: {}", connector.name(), e);
            }
        }
    }

    /// Tell every connector about a created or updated mapping
    pub async fn notify_upsert(&self, mapping: &Mapping) -> Vec<(String, SubscriptionChange)> {
        let mut changes = Vec::new();
        for connector in self.snapshot() {
            let change = connector.mapping_upserted(mapping).await;
            changes.push((connector.name().to_string(), change));
        }
        changes
    }

    /// Tell every connector about a deleted mapping
    pub async fn notify_delete(&self, mapping_id: &str) -> Vec<(String, SubscriptionChange)> {
        let mut changes = Vec::new();
        for connector in self.snapshot() {
            let change = connector.mapping_deleted(mapping_id).await;
            changes.push((connector.name().to_string(), change));
        }
        changes
    }

    /// Store a mapping and update broker subscriptions
    pub async fn upsert_mapping(&self, mapping: Mapping) -> Result<Arc<Mapping>, StoreError> {
        let upserted = self.pipeline.store().upsert(mapping)?;
        self.notify_upsert(&upserted.mapping).await;
        Ok(upserted.mapping)
    }

    /// Remove a mapping, its subscriptions and its status counters
    pub async fn delete_mapping(&self, mapping_id: &str) -> Option<Arc<Mapping>> {
        let removed = self.pipeline.store().delete(mapping_id)?;
        self.notify_delete(mapping_id).await;
        self.pipeline.status().remove(mapping_id);
        Some(removed)
    }

    /// Publish a platform event through every connected connector
    pub async fn publish_outbound(&self, api: Api, event: &Value) -> Vec<ProcessingContext> {
        let mut contexts = Vec::new();
        for connector in self.snapshot() {
            if connector.status() == ConnectorStatus::Connected {
                contexts.extend(connector.publish_outbound(api, event).await);
            }
        }
        contexts
    }
}
