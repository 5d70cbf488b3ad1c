//! In-process transport
//!
//! Records every call, delivers injected messages and can simulate
//! broker failures.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::transport::{
    ConnectorError, InboundMessage, Transport, TransportEvent, TransportEvents,
};

const EVENT_CAPACITY: usize = 64;

/// A call made on the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    Disconnect,
    Subscribe(String, u8),
    Unsubscribe(String),
    Publish(String),
}

/// A message published through the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Default)]
struct MemoryState {
    events: Option<mpsc::Sender<TransportEvent>>,
    calls: Vec<TransportCall>,
    subscriptions: BTreeMap<String, u8>,
    published: Vec<PublishedMessage>,
    failing_topics: HashSet<String>,
    stalled_topics: HashSet<String>,
    failing_connects: usize,
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connect attempts
    pub fn fail_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    /// Reject subscribes to `topic`
    pub fn fail_subscribe(&self, topic: &str) {
        self.state.lock().failing_topics.insert(topic.to_string());
    }

    /// Never complete subscribes to `topic`, like a broker that stops answering
    pub fn stall_subscribe(&self, topic: &str) {
        self.state.lock().stalled_topics.insert(topic.to_string());
    }

    /// Deliver a message; the receiver fires when it is acknowledged
    pub async fn inject(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: u8,
    ) -> Result<oneshot::Receiver<()>, ConnectorError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let mut message = InboundMessage::new(topic, payload.into(), qos);
        message.ack = Some(ack_tx);
        self.send(TransportEvent::Message(message)).await?;
        Ok(ack_rx)
    }

    /// Simulate the broker dropping the session
    pub async fn drop_connection(&self, reason: &str) -> Result<(), ConnectorError> {
        self.send(TransportEvent::Disconnected {
            code: None,
            reason: reason.to_string(),
        })
        .await?;
        let mut state = self.state.lock();
        state.events = None;
        state.subscriptions.clear();
        Ok(())
    }

    async fn send(&self, event: TransportEvent) -> Result<(), ConnectorError> {
        let tx = self
            .state
            .lock()
            .events
            .clone()
            .ok_or(ConnectorError::NotConnected)?;
        tx.send(event)
            .await
            .map_err(|_| ConnectorError::ConnectionLost("event stream closed".to_string()))
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Topics currently subscribed, with their QoS
    pub fn subscriptions(&self) -> BTreeMap<String, u8> {
        self.state.lock().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| **c == TransportCall::Connect)
            .count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<TransportEvents, ConnectorError> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::Connect);
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ConnectorError::ConnectionLost(
                "connection refused".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        tx.try_send(TransportEvent::Connected {
            uri: "memory://".to_string(),
        })
        .map_err(|_| ConnectorError::QueueFull)?;
        state.events = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::Disconnect);
        state.events = None;
        state.subscriptions.clear();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), ConnectorError> {
        let stalled = {
            let mut state = self.state.lock();
            state
                .calls
                .push(TransportCall::Subscribe(topic.to_string(), qos));
            if state.events.is_none() {
                return Err(ConnectorError::NotConnected);
            }
            if state.failing_topics.contains(topic) {
                return Err(ConnectorError::Rejected(format!(
                    "subscribe to '{}' refused",
                    topic
                )));
            }
            let stalled = state.stalled_topics.contains(topic);
            if !stalled {
                state.subscriptions.insert(topic.to_string(), qos);
            }
            stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ConnectorError> {
        let mut state = self.state.lock();
        state
            .calls
            .push(TransportCall::Unsubscribe(topic.to_string()));
        if state.events.is_none() {
            return Err(ConnectorError::NotConnected);
        }
        state.subscriptions.remove(topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: u8,
        retain: bool,
    ) -> Result<(), ConnectorError> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::Publish(topic.to_string()));
        if state.events.is_none() {
            return Err(ConnectorError::NotConnected);
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().events.is_some()
    }
}
