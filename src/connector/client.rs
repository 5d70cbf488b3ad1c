//! MQTT Connector Client
//!
//! Keeps a session to one broker alive, subscribes the topics of all
//! active inbound mappings and feeds received messages into the
//! processing pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::transport::{ConnectorError, ConnectorStatus, InboundMessage, Transport, TransportEvent};
use crate::config::ConnectorConfig;
use crate::mapping::{Api, Mapping};
use crate::processor::{Pipeline, ProcessingContext, ProcessingError};
use crate::subscription::{SubscriptionChange, SubscriptionRegistry};

/// Message to send to the connection task
#[derive(Debug)]
enum ConnectorCommand {
    Shutdown,
}

/// Everything the connection task needs, detached from the client
struct Session {
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    pipeline: Arc<Pipeline>,
    status: Arc<RwLock<ConnectorStatus>>,
}

/// Connector to a single MQTT broker
pub struct ConnectorClient {
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    pipeline: Arc<Pipeline>,
    /// Current connection status
    status: Arc<RwLock<ConnectorStatus>>,
    /// Command channel to the connection task
    command_tx: Mutex<Option<mpsc::Sender<ConnectorCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectorClient {
    pub fn new(
        config: ConnectorConfig,
        transport: Arc<dyn Transport>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            registry: Arc::new(
                SubscriptionRegistry::new(transport.clone())
                    .with_timeout(config.operation_timeout),
            ),
            status: Arc::new(RwLock::new(ConnectorStatus::Disconnected)),
            command_tx: Mutex::new(None),
            task: Mutex::new(None),
            config,
            transport,
            pipeline,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn status(&self) -> ConnectorStatus {
        *self.status.read()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Mapping count per subscribed topic
    pub fn active_subscriptions(&self) -> BTreeMap<String, usize> {
        self.registry.active_subscriptions()
    }

    /// Spawn the connection task
    pub fn start(&self) -> Result<(), ConnectorError> {
        if !self.config.enabled {
            info!("Connector '{}': Disabled, not starting", self.config.name);
            return Ok(());
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(ConnectorError::Other(format!(
                "connector '{}' is already running",
                self.config.name
            )));
        }

        let (tx, rx) = mpsc::channel(16);
        *self.command_tx.lock() = Some(tx);

        let session = Session {
            config: self.config.clone(),
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            pipeline: self.pipeline.clone(),
            status: self.status.clone(),
        };
        *task = Some(tokio::spawn(Self::connection_loop(session, rx)));

        info!(
            "Connector '{}': Starting ({})",
            self.config.name,
            self.config.uri()
        );
        Ok(())
    }

    /// Stop the connection task and wait for it to finish
    pub async fn stop(&self) -> Result<(), ConnectorError> {
        let tx = self.command_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(ConnectorCommand::Shutdown).await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| ConnectorError::Other(format!("connection task failed: {}", e)))?;
        }

        *self.status.write() = ConnectorStatus::Disconnected;
        info!("Connector '{}': Stopped", self.config.name);
        Ok(())
    }

    /// Publish to the broker within the operation timeout
    pub async fn publish(&self, topic: &str, payload: Bytes, qos: u8) -> Result<(), ConnectorError> {
        if self.status() != ConnectorStatus::Connected {
            return Err(ConnectorError::NotConnected);
        }
        timeout(
            self.config.operation_timeout,
            self.transport.publish(topic, payload, qos, false),
        )
        .await
        .map_err(|_| ConnectorError::Timeout)?
    }

    /// Map a platform event through the outbound mappings and publish the
    /// resulting documents
    pub async fn publish_outbound(&self, api: Api, event: &Value) -> Vec<ProcessingContext> {
        let mut contexts = self.pipeline.draft_outbound(api, event);

        for ctx in &mut contexts {
            let topic = match ctx.resolved_publish_topic.clone() {
                Some(topic) if ctx.errors.is_empty() => topic,
                _ => {
                    self.pipeline.status().record(ctx);
                    continue;
                }
            };
            let qos = ctx.mapping.qos;

            for request in ctx.requests.iter_mut() {
                let payload = match serde_json::to_vec(&request.document) {
                    Ok(payload) => Bytes::from(payload),
                    Err(e) => {
                        request.error = Some(ProcessingError::Publish(e.to_string()));
                        continue;
                    }
                };
                match self.publish(&topic, payload, qos).await {
                    Ok(()) => {
                        debug!(
                            "Connector '{}': Published '{}' for mapping '{}'",
                            self.config.name, topic, ctx.mapping.id
                        );
                        request.response = Some(request.document.clone());
                    }
                    Err(e) => {
                        warn!(
                            "Connector '{}': Publish to '{}' failed: {}",
                            self.config.name, topic, e
                        );
                        request.error = Some(ProcessingError::Publish(e.to_string()));
                    }
                }
            }
            self.pipeline.status().record(ctx);
        }

        contexts
    }

    pub async fn mapping_upserted(&self, mapping: &Mapping) -> SubscriptionChange {
        self.registry.upsert(mapping).await
    }

    pub async fn mapping_deleted(&self, mapping_id: &str) -> SubscriptionChange {
        self.registry.delete(mapping_id).await
    }

    /// Bring broker subscriptions in line with the current store
    pub async fn refresh_subscriptions(&self) -> SubscriptionChange {
        let mappings = self.pipeline.store().inbound_mappings();
        self.registry
            .update_active_subscriptions(&mappings, false)
            .await
    }

    /// Run the connection loop
    async fn connection_loop(session: Session, mut command_rx: mpsc::Receiver<ConnectorCommand>) {
        let base_retry = session.config.reconnect_interval_duration();
        let max_retry = session.config.max_reconnect_interval_duration();
        let mut retry_interval = base_retry;

        loop {
            *session.status.write() = ConnectorStatus::Connecting;
            debug!(
                "Connector '{}': Connecting to {}",
                session.config.name, session.config.address
            );

            match Self::connect_and_run(&session, &mut command_rx, &mut retry_interval).await {
                Ok(()) => {
                    info!("Connector '{}': Disconnected gracefully", session.config.name);
                    *session.status.write() = ConnectorStatus::Disconnected;
                    return;
                }
                Err(ConnectorError::InvalidConfig(msg)) => {
                    error!("Connector '{}': Invalid config: {}", session.config.name, msg);
                    *session.status.write() = ConnectorStatus::Failed;
                    return;
                }
                Err(e) => {
                    error!("Connector '{}': Connection failed: {}", session.config.name, e);
                    *session.status.write() = ConnectorStatus::Backoff;
                    debug!(
                        "Connector '{}': Reconnecting in {:?}",
                        session.config.name, retry_interval
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(retry_interval) => {}
                        cmd = command_rx.recv() => match cmd {
                            Some(ConnectorCommand::Shutdown) | None => {
                                info!("Connector '{}': Shutdown requested", session.config.name);
                                *session.status.write() = ConnectorStatus::Disconnected;
                                return;
                            }
                        }
                    }
                    retry_interval = std::cmp::min(retry_interval * 2, max_retry);
                }
            }
        }
    }

    /// Connect to the broker and run the event loop until the session ends
    async fn connect_and_run(
        session: &Session,
        command_rx: &mut mpsc::Receiver<ConnectorCommand>,
        retry_interval: &mut Duration,
    ) -> Result<(), ConnectorError> {
        let name = &session.config.name;
        let mut events = timeout(
            session.config.connect_timeout_duration(),
            session.transport.connect(),
        )
        .await
        .map_err(|_| ConnectorError::Timeout)??;

        let permits = Arc::new(Semaphore::new(session.pipeline.workers()));
        let mut inflight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(ConnectorCommand::Shutdown) | None => {
                        Self::drain(name, &mut inflight).await;
                        session.transport.disconnect().await?;
                        return Ok(());
                    }
                },

                event = events.recv() => match event {
                    Some(TransportEvent::Connected { uri }) => {
                        info!("Connector '{}': Connected to {}", name, uri);
                        let mappings = session.pipeline.store().inbound_mappings();
                        let change = session
                            .registry
                            .update_active_subscriptions(&mappings, true)
                            .await;
                        if !change.failed.is_empty() {
                            warn!(
                                "Connector '{}': {} subscription(s) failed",
                                name,
                                change.failed.len()
                            );
                        }
                        *session.status.write() = ConnectorStatus::Connected;
                        *retry_interval = session.config.reconnect_interval_duration();
                    }
                    Some(TransportEvent::Message(message)) => {
                        let permits = permits.clone();
                        let pipeline = session.pipeline.clone();
                        inflight.spawn(async move {
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return;
                            };
                            Self::handle_message(pipeline, message).await;
                        });
                    }
                    Some(TransportEvent::Disconnected { code, reason }) => {
                        warn!(
                            "Connector '{}': Disconnected (code {:?}): {}",
                            name, code, reason
                        );
                        *session.status.write() = ConnectorStatus::Disconnected;
                        Self::drain(name, &mut inflight).await;
                        return Err(ConnectorError::ConnectionLost(reason));
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!("Connector '{}': Transport error: {}", name, e);
                    }
                    None => {
                        Self::drain(name, &mut inflight).await;
                        return Err(ConnectorError::ConnectionLost(
                            "event stream closed".to_string(),
                        ));
                    }
                },

                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connector '{}': Message task failed: {}", name, e);
                    }
                }
            }
        }
    }

    /// Wait for every in-flight message to finish its dispatch
    async fn drain(name: &str, inflight: &mut JoinSet<()>) {
        if !inflight.is_empty() {
            debug!(
                "Connector '{}': Waiting for {} in-flight message(s)",
                name,
                inflight.len()
            );
        }
        while let Some(joined) = inflight.join_next().await {
            if let Err(e) = joined {
                error!("Connector '{}': Message task failed: {}", name, e);
            }
        }
    }

    /// Process one broker message and acknowledge it once dispatch is done
    async fn handle_message(pipeline: Arc<Pipeline>, mut message: InboundMessage) {
        debug!(
            "Received {} bytes on '{}' (qos {}, retain {})",
            message.payload.len(),
            message.topic,
            message.qos,
            message.retain
        );
        let contexts = pipeline
            .handle_message(&message.topic, message.payload.clone(), message.qos)
            .await;
        let failed = contexts.iter().filter(|c| c.has_errors()).count();
        if failed > 0 {
            debug!(
                "Message on '{}': {} of {} mapping(s) reported errors",
                message.topic,
                failed,
                contexts.len()
            );
        }
        message.ack();
    }
}
