//! Subscription Registry
//!
//! Keeps one broker subscription per distinct subscription topic, shared
//! by every active inbound mapping on that topic. The registry counts the
//! mappings per topic and only talks to the broker when a count moves
//! between zero and one.
//!
//! A mapping that asks for a higher QoS on an already subscribed topic
//! raises the shared subscription, which is sent to the broker again.
//!
//! Registry state always reflects the mappings' interest. Transport
//! failures are reported in the returned [`SubscriptionChange`] and are
//! repaired by the next full refresh, e.g. after a reconnect.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::connector::{ConnectorError, Transport};
use crate::mapping::Mapping;
use crate::topic::normalize_topic;


/// Reference count and QoS of one broker subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub count: usize,
    pub qos: u8,
}

/// Broker operations performed by one registry call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub subscribed: Vec<String>,
    pub unsubscribed: Vec<String>,
    pub failed: Vec<(String, ConnectorError)>,
}

impl SubscriptionChange {
    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty() && self.unsubscribed.is_empty() && self.failed.is_empty()
    }
}

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Effect of counting a mapping on a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acquired {
    New,
    Raised,
    Shared,
}

#[derive(Debug, Default)]
struct RegistryState {
    topics: HashMap<String, SubscriptionEntry>,
    by_mapping: HashMap<String, String>,
}

impl RegistryState {
    /// Count a mapping on a topic
    fn acquire(&mut self, mapping_id: &str, topic: &str, qos: u8) -> Acquired {
        self.by_mapping
            .insert(mapping_id.to_string(), topic.to_string());
        match self.topics.get_mut(topic) {
            Some(entry) => {
                entry.count += 1;
                if qos > entry.qos {
                    entry.qos = qos;
                    Acquired::Raised
                } else {
                    Acquired::Shared
                }
            }
            None => {
                self.topics
                    .insert(topic.to_string(), SubscriptionEntry { count: 1, qos });
                Acquired::New
            }
        }
    }

    /// Raise the QoS of a topic
    fn raise(&mut self, topic: &str, qos: u8) -> bool {
        match self.topics.get_mut(topic) {
            Some(entry) if qos > entry.qos => {
                entry.qos = qos;
                true
            }
            _ => false,
        }
    }

    /// Release a mapping's topic; true when nothing references it anymore
    fn release(&mut self, topic: &str) -> bool {
        match self.topics.get_mut(topic) {
            Some(entry) if entry.count > 1 => {
                entry.count -= 1;
                false
            }
            Some(_) => {
                self.topics.remove(topic);
                true
            }
            None => false,
        }
    }
}

/// Transport calls to perform once the state lock is released
#[derive(Debug, Default)]
struct Plan {
    subscribe: Vec<(String, u8)>,
    unsubscribe: Vec<String>,
}

fn interest(mapping: &Mapping) -> Option<String> {
    (mapping.is_inbound() && mapping.active)
        .then(|| normalize_topic(&mapping.subscription_topic))
        .filter(|topic| !topic.is_empty())
}

pub struct SubscriptionRegistry {
    transport: Arc<dyn Transport>,
    state: Mutex<RegistryState>,
    operation_timeout: Duration,
    /// Serializes mutations so transport calls follow state order
    serial: tokio::sync::Mutex<()>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(RegistryState::default()),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            serial: tokio::sync::Mutex::new(()),
        }
    }

    /// Limit for a single subscribe or unsubscribe call
    pub fn with_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    /// Account for a created or updated mapping
    pub async fn upsert(&self, mapping: &Mapping) -> SubscriptionChange {
        let _serial = self.serial.lock().await;

        let desired = interest(mapping);
        let plan = {
            let mut state = self.state.lock();
            let current = state.by_mapping.get(&mapping.id).cloned();
            let mut plan = Plan::default();
            if current == desired {
                // Same topic, only a QoS increase reaches the broker
                match desired {
                    Some(topic) if state.raise(&topic, mapping.qos) => {
                        plan.subscribe.push((topic, mapping.qos));
                    }
                    _ => return SubscriptionChange::default(),
                }
                plan
            } else {
                if let Some(old) = current {
                    state.by_mapping.remove(&mapping.id);
                    if state.release(&old) {
                        plan.unsubscribe.push(old);
                    }
                }
                if let Some(topic) = desired {
                    match state.acquire(&mapping.id, &topic, mapping.qos) {
                        Acquired::New | Acquired::Raised => {
                            plan.subscribe.push((topic, mapping.qos))
                        }
                        Acquired::Shared => {}
                    }
                }
                plan
            }
        };

        self.apply(plan).await
    }

    /// Account for a deleted mapping
    pub async fn delete(&self, mapping_id: &str) -> SubscriptionChange {
        let _serial = self.serial.lock().await;

        let plan = {
            let mut state = self.state.lock();
            let Some(topic) = state.by_mapping.remove(mapping_id) else {
                warn!(
                    "Registry: No subscription recorded for mapping '{}'",
                    mapping_id
                );
                return SubscriptionChange::default();
            };
            let mut plan = Plan::default();
            if state.release(&topic) {
                plan.unsubscribe.push(topic);
            }
            plan
        };

        self.apply(plan).await
    }

    /// Recompute subscriptions for a full set of mappings.
    ///
    /// With `reset` every desired topic is subscribed again, as needed
    /// after a new broker session. Otherwise only the difference to the
    /// current state is applied.
    pub async fn update_active_subscriptions(
        &self,
        mappings: &[Arc<Mapping>],
        reset: bool,
    ) -> SubscriptionChange {
        let _serial = self.serial.lock().await;

        let mut desired = RegistryState::default();
        for mapping in mappings {
            if let Some(topic) = interest(mapping) {
                desired.acquire(&mapping.id, &topic, mapping.qos);
            }
        }

        let plan = {
            let mut state = self.state.lock();
            let mut plan = Plan::default();

            let mut wanted: Vec<(&String, &SubscriptionEntry)> = desired.topics.iter().collect();
            wanted.sort_by(|a, b| a.0.cmp(b.0));

            if reset {
                plan.subscribe = wanted
                    .into_iter()
                    .map(|(topic, entry)| (topic.clone(), entry.qos))
                    .collect();
            } else {
                let mut stale: Vec<String> = state
                    .topics
                    .keys()
                    .filter(|topic| !desired.topics.contains_key(*topic))
                    .cloned()
                    .collect();
                stale.sort();
                plan.unsubscribe = stale;
                plan.subscribe = wanted
                    .into_iter()
                    .filter(|(topic, entry)| {
                        state
                            .topics
                            .get(*topic)
                            .map_or(true, |current| entry.qos > current.qos)
                    })
                    .map(|(topic, entry)| (topic.clone(), entry.qos))
                    .collect();
            }

            *state = desired;
            plan
        };

        debug!(
            "Registry: Refresh (reset={}) subscribes {} and unsubscribes {} topic(s)",
            reset,
            plan.subscribe.len(),
            plan.unsubscribe.len()
        );
        self.apply(plan).await
    }

    /// Mapping count per subscribed topic
    pub fn active_subscriptions(&self) -> BTreeMap<String, usize> {
        self.state
            .lock()
            .topics
            .iter()
            .map(|(topic, entry)| (topic.clone(), entry.count))
            .collect()
    }

    pub fn entry(&self, topic: &str) -> Option<SubscriptionEntry> {
        self.state.lock().topics.get(topic).copied()
    }

    /// Topic a mapping is counted under
    pub fn topic_for(&self, mapping_id: &str) -> Option<String> {
        self.state.lock().by_mapping.get(mapping_id).cloned()
    }

    async fn apply(&self, plan: Plan) -> SubscriptionChange {
        let mut change = SubscriptionChange::default();

        for topic in plan.unsubscribe {
            let result = timeout(self.operation_timeout, self.transport.unsubscribe(&topic))
                .await
                .unwrap_or(Err(ConnectorError::Timeout));
            match result {
                Ok(()) => {
                    info!("Registry: Unsubscribed from '{}'", topic);
                    change.unsubscribed.push(topic);
                }
                Err(e) => {
                    warn!("Registry: Failed to unsubscribe from '{}': {}", topic, e);
                    change.failed.push((topic, e));
                }
            }
        }

        for (topic, qos) in plan.subscribe {
            let result = timeout(self.operation_timeout, self.transport.subscribe(&topic, qos))
                .await
                .unwrap_or(Err(ConnectorError::Timeout));
            match result {
                Ok(()) => {
                    info!("Registry: Subscribed to '{}' (qos {})", topic, qos);
                    change.subscribed.push(topic);
                }
                Err(e) => {
                    warn!("Registry: Failed to subscribe to '{}': {}", topic, e);
                    change.failed.push((topic, e));
                }
            }
        }

        change
    }
}
