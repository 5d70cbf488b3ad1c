//! End-to-end tests: in-memory broker, connector, pipeline and platform

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::time::timeout;

use vibemap::config::ConnectorConfig;
use vibemap::connector::{
    ConnectorError, ConnectorManager, ConnectorStatus, MemoryTransport, TransportCall,
};
use vibemap::mapping::{Api, Mapping, MappingStore, Substitution};
use vibemap::platform::{MemoryPlatform, PlatformClient, PlatformError};
use vibemap::processor::{ExtensionRegistry, Pipeline, TargetRequest};

const TEMPLATE: &str = r#"{
    "source": {"id": ""},
    "type": "c8y_Measurement",
    "time": "",
    "reading": {"value": 0}
}"#;

fn inbound(id: &str, measurement: &str) -> Mapping {
    let mut mapping = Mapping::inbound(id, format!("/plant/+/{}", measurement));
    mapping.template_topic = format!("/plant/hall1/{}", measurement);
    mapping.target_template = TEMPLATE.to_string();
    mapping.substitutions = vec![
        Substitution::new("_TOPIC_LEVEL_[1]", "source.id").identifier(),
        Substitution::new("value", "reading.value"),
    ];
    mapping
}

fn outbound() -> Mapping {
    let mut mapping = Mapping::outbound("out", Api::Measurement, "reading", "/out/+/reading");
    mapping.target_template = r#"{"value": 0}"#.to_string();
    mapping.substitutions = vec![
        Substitution::new("reading.value", "value"),
        Substitution::new("source.id", "_TOPIC_LEVEL_[1]"),
    ];
    mapping
}

fn connector(name: &str) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        address: "memory".to_string(),
        reconnect_interval: 0,
        max_reconnect_interval: 0,
        connect_timeout: 1,
        operation_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

struct Harness {
    manager: ConnectorManager,
    transport: Arc<MemoryTransport>,
    platform: Arc<MemoryPlatform>,
}

fn harness(mappings: Vec<Mapping>) -> Harness {
    let store = Arc::new(MappingStore::new());
    for mapping in mappings {
        store.upsert(mapping).unwrap();
    }
    let platform = Arc::new(MemoryPlatform::new());
    let pipeline = Arc::new(Pipeline::new(
        store,
        Arc::new(ExtensionRegistry::new()),
        platform.clone(),
        4,
        true,
    ));
    Harness {
        manager: ConnectorManager::new(pipeline),
        transport: Arc::new(MemoryTransport::new()),
        platform,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn subscribed(transport: &MemoryTransport) -> Vec<String> {
    transport.subscriptions().into_keys().collect()
}

#[tokio::test]
async fn test_message_reaches_platform_before_ack() {
    let h = harness(vec![inbound("temp", "temperature")]);
    let client = h.manager.add(connector("edge"), h.transport.clone());
    h.manager.start_all();
    wait_for(|| client.status() == ConnectorStatus::Connected).await;

    assert_eq!(
        h.transport.subscriptions(),
        BTreeMap::from([("/plant/+/temperature".to_string(), 1)])
    );
    assert_eq!(h.manager.connected_count(), 1);

    let ack = h
        .transport
        .inject(
            "/plant/hall7/temperature",
            json!({"value": 21.5}).to_string(),
            1,
        )
        .await
        .unwrap();
    timeout(Duration::from_secs(5), ack).await.unwrap().unwrap();

    let requests = h.platform.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].source_id.as_deref(), Some("hall7"));
    assert_eq!(requests[0].document["source"]["id"], json!("hall7"));
    assert_eq!(requests[0].document["reading"]["value"], json!(21.5));
    assert!(requests[0].document["time"].as_str().is_some_and(|t| !t.is_empty()));

    let status = h.manager.pipeline().status().get("temp").unwrap();
    assert_eq!(status.messages_received, 1);
    assert_eq!(status.documents_created, 1);

    h.manager.stop_all().await;
    assert_eq!(client.status(), ConnectorStatus::Disconnected);
    assert_eq!(h.transport.calls().last(), Some(&TransportCall::Disconnect));
}

#[tokio::test]
async fn test_bad_payload_is_still_acked() {
    let h = harness(vec![inbound("temp", "temperature")]);
    let client = h.manager.add(connector("edge"), h.transport.clone());
    h.manager.start_all();
    wait_for(|| client.status() == ConnectorStatus::Connected).await;

    let ack = h
        .transport
        .inject("/plant/hall1/temperature", "not json", 1)
        .await
        .unwrap();
    timeout(Duration::from_secs(5), ack).await.unwrap().unwrap();

    assert!(h.platform.requests().is_empty());
    let status = h.manager.pipeline().status().get("temp").unwrap();
    assert_eq!(status.errors, 1);
    assert!(status.last_error.is_some());

    h.manager.stop_all().await;
}

#[tokio::test]
async fn test_mapping_changes_follow_to_broker() {
    let h = harness(vec![inbound("temp", "temperature")]);
    let client = h.manager.add(connector("edge"), h.transport.clone());
    h.manager.start_all();
    wait_for(|| client.status() == ConnectorStatus::Connected).await;

    h.manager
        .upsert_mapping(inbound("hum", "humidity"))
        .await
        .unwrap();
    assert_eq!(
        subscribed(&h.transport),
        vec![
            "/plant/+/humidity".to_string(),
            "/plant/+/temperature".to_string()
        ]
    );

    // Second mapping on an existing topic shares the subscription
    h.manager
        .upsert_mapping(inbound("temp2", "temperature"))
        .await
        .unwrap();
    assert_eq!(
        client.active_subscriptions().get("/plant/+/temperature"),
        Some(&2)
    );

    h.manager.delete_mapping("temp").await.unwrap();
    assert!(subscribed(&h.transport).contains(&"/plant/+/temperature".to_string()));

    h.manager.delete_mapping("temp2").await.unwrap();
    assert_eq!(subscribed(&h.transport), vec!["/plant/+/humidity".to_string()]);
    assert!(h.manager.delete_mapping("temp2").await.is_none());

    h.manager.stop_all().await;
}

#[tokio::test]
async fn test_reconnect_resubscribes() {
    let h = harness(vec![inbound("temp", "temperature")]);
    let client = h.manager.add(connector("edge"), h.transport.clone());
    h.manager.start_all();
    wait_for(|| client.status() == ConnectorStatus::Connected).await;

    h.transport.drop_connection("broker restart").await.unwrap();
    assert!(h.transport.subscriptions().is_empty());

    let transport = h.transport.clone();
    wait_for(|| transport.connect_count() == 2 && client.status() == ConnectorStatus::Connected)
        .await;
    assert_eq!(
        subscribed(&h.transport),
        vec!["/plant/+/temperature".to_string()]
    );

    h.manager.stop_all().await;
}

#[tokio::test]
async fn test_connect_failures_back_off_and_recover() {
    let h = harness(vec![inbound("temp", "temperature")]);
    h.transport.fail_connects(2);
    let client = h.manager.add(connector("edge"), h.transport.clone());
    h.manager.start_all();

    wait_for(|| client.status() == ConnectorStatus::Connected).await;
    assert_eq!(h.transport.connect_count(), 3);

    h.manager.stop_all().await;
}

#[tokio::test]
async fn test_outbound_event_published() {
    let h = harness(vec![outbound()]);
    let client = h.manager.add(connector("edge"), h.transport.clone());

    let event = json!({"source": {"id": "dev7"}, "reading": {"value": 3}});
    assert_eq!(
        client
            .publish("/out/x", bytes::Bytes::from_static(b"{}"), 0)
            .await,
        Err(ConnectorError::NotConnected)
    );
    assert!(h.manager.publish_outbound(Api::Measurement, &event).await.is_empty());

    h.manager.start_all();
    wait_for(|| client.status() == ConnectorStatus::Connected).await;
    assert!(h.transport.subscriptions().is_empty());

    let contexts = h.manager.publish_outbound(Api::Measurement, &event).await;
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].requests[0].response.is_some());

    let published = h.transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "/out/dev7/reading");
    let payload: Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(payload, json!({"value": 3}));

    h.manager.stop_all().await;
}

#[tokio::test]
async fn test_disabled_connector_stays_idle() {
    let h = harness(vec![inbound("temp", "temperature")]);
    let mut config = connector("off");
    config.enabled = false;
    let client = h.manager.add(config, h.transport.clone());

    h.manager.start_all();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.status(), ConnectorStatus::Disconnected);
    assert_eq!(h.transport.connect_count(), 0);
    assert_eq!(
        h.manager.status(),
        vec![("off".to_string(), ConnectorStatus::Disconnected)]
    );
}

/// Platform that takes its time for every document
struct SlowPlatform {
    delay: Duration,
    completed: AtomicUsize,
}

#[async_trait]
impl PlatformClient for SlowPlatform {
    async fn create_or_update(&self, request: &TargetRequest) -> Result<Value, PlatformError> {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(request.document.clone())
    }

    async fn resolve_external_id(
        &self,
        _external_id_type: &str,
        _external_id: &str,
    ) -> Result<Option<String>, PlatformError> {
        Ok(None)
    }

    async fn create_device(
        &self,
        _external_id_type: &str,
        external_id: &str,
        _name: &str,
    ) -> Result<String, PlatformError> {
        Ok(external_id.to_string())
    }
}

#[tokio::test]
async fn test_connection_loss_lets_inflight_message_finish() {
    let store = Arc::new(MappingStore::new());
    store.upsert(inbound("temp", "temperature")).unwrap();
    let platform = Arc::new(SlowPlatform {
        delay: Duration::from_millis(300),
        completed: AtomicUsize::new(0),
    });
    let pipeline = Arc::new(Pipeline::new(
        store,
        Arc::new(ExtensionRegistry::new()),
        platform.clone(),
        4,
        true,
    ));
    let manager = ConnectorManager::new(pipeline);
    let transport = Arc::new(MemoryTransport::new());
    let client = manager.add(connector("edge"), transport.clone());
    manager.start_all();
    wait_for(|| client.status() == ConnectorStatus::Connected).await;

    let ack = transport
        .inject(
            "/plant/hall7/temperature",
            json!({"value": 5}).to_string(),
            1,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.drop_connection("broker restart").await.unwrap();

    timeout(Duration::from_secs(5), ack).await.unwrap().unwrap();
    assert_eq!(platform.completed.load(Ordering::SeqCst), 1);

    wait_for(|| transport.connect_count() == 2 && client.status() == ConnectorStatus::Connected)
        .await;
    assert_eq!(platform.completed.load(Ordering::SeqCst), 1);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_unanswered_subscribe_does_not_block_connector() {
    let h = harness(vec![inbound("temp", "temperature")]);
    h.transport.stall_subscribe("/plant/+/temperature");
    let mut config = connector("edge");
    config.operation_timeout = Duration::from_millis(200);
    let client = h.manager.add(config, h.transport.clone());
    h.manager.start_all();

    wait_for(|| client.status() == ConnectorStatus::Connected).await;
    assert!(h.transport.subscriptions().is_empty());
    assert_eq!(
        client.active_subscriptions().get("/plant/+/temperature"),
        Some(&1)
    );

    timeout(Duration::from_secs(2), h.manager.stop_all())
        .await
        .unwrap();
    assert_eq!(client.status(), ConnectorStatus::Disconnected);
}
