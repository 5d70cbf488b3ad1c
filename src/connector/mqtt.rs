//! MQTT transport over rumqttc

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{
    ConnectorError, InboundMessage, Transport, TransportEvent, TransportEvents,
};
use crate::config::ConnectorConfig;

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn qos_to_u8(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

fn client_error(e: rumqttc::ClientError) -> ConnectorError {
    ConnectorError::ConnectionLost(e.to_string())
}

/// Transport backed by a rumqttc `AsyncClient` with manual acks.
///
/// Every `connect` builds a fresh client and event loop; the event loop
/// task ends on the first connection error so reconnects stay under the
/// connector's backoff.
pub struct MqttTransport {
    config: ConnectorConfig,
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let (host, port) = self.config.parse_address();
        let mut options = MqttOptions::new(&self.config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(u64::from(self.config.keepalive.max(5))));
        options.set_clean_session(self.config.clean_session);
        options.set_manual_acks(true);
        if let Some(username) = &self.config.username {
            options.set_credentials(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            );
        }
        options
    }

    fn current_client(&self) -> Result<AsyncClient, ConnectorError> {
        self.client
            .lock()
            .clone()
            .ok_or(ConnectorError::NotConnected)
    }

    fn stop_event_loop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn run_event_loop(
        name: String,
        uri: String,
        client: AsyncClient,
        mut eventloop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
        connected: Arc<AtomicBool>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        connected.store(false, Ordering::SeqCst);
                        let _ = events
                            .send(TransportEvent::Disconnected {
                                code: Some(ack.code as u8),
                                reason: format!("CONNACK refused: {:?}", ack.code),
                            })
                            .await;
                        return;
                    }
                    debug!(
                        "Connector '{}': CONNACK received (session_present={})",
                        name, ack.session_present
                    );
                    connected.store(true, Ordering::SeqCst);
                    if events
                        .send(TransportEvent::Connected { uri: uri.clone() })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.clone(),
                        qos: qos_to_u8(publish.qos),
                        retain: publish.retain,
                        ack: Some(ack_tx),
                    };
                    if events.send(TransportEvent::Message(message)).await.is_err() {
                        return;
                    }

                    let acker = client.clone();
                    let name = name.clone();
                    tokio::spawn(async move {
                        let _ = ack_rx.await;
                        if let Err(e) = acker.ack(&publish).await {
                            warn!("Connector '{}': Failed to ack '{}': {}", name, publish.topic, e);
                        }
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    connected.store(false, Ordering::SeqCst);
                    let _ = events
                        .send(TransportEvent::Disconnected {
                            code: None,
                            reason: "broker sent DISCONNECT".to_string(),
                        })
                        .await;
                    return;
                }
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => continue,
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    let _ = events
                        .send(TransportEvent::Disconnected {
                            code: None,
                            reason: e.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<TransportEvents, ConnectorError> {
        self.stop_event_loop();

        let (client, eventloop) = AsyncClient::new(self.options(), self.config.inflight.max(1));
        let (tx, rx) = mpsc::channel(self.config.inflight.max(1));

        let task = tokio::spawn(Self::run_event_loop(
            self.config.name.clone(),
            self.config.uri(),
            client.clone(),
            eventloop,
            tx,
            self.connected.clone(),
        ));

        *self.client.lock() = Some(client);
        *self.task.lock() = Some(task);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let client = self.client.lock().take();
        let result = match client {
            Some(client) => client.disconnect().await.map_err(client_error),
            None => Ok(()),
        };
        self.stop_event_loop();
        result
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), ConnectorError> {
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.current_client()?
            .subscribe(topic, qos_from_u8(qos))
            .await
            .map_err(client_error)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ConnectorError> {
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.current_client()?
            .unsubscribe(topic)
            .await
            .map_err(client_error)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: u8,
        retain: bool,
    ) -> Result<(), ConnectorError> {
        self.current_client()?
            .publish_bytes(topic, qos_from_u8(qos), retain, payload)
            .await
            .map_err(client_error)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        for qos in 0..=2 {
            assert_eq!(qos_to_u8(qos_from_u8(qos)), qos);
        }
        assert_eq!(qos_from_u8(7), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let transport = MqttTransport::new(ConnectorConfig::default());
        assert!(!transport.is_connected());
        assert_eq!(
            transport.subscribe("a/+", 1).await,
            Err(ConnectorError::NotConnected)
        );
        assert_eq!(
            transport
                .publish("a/b", Bytes::from_static(b"x"), 0, false)
                .await,
            Err(ConnectorError::NotConnected)
        );
        assert!(transport.disconnect().await.is_ok());
    }
}
