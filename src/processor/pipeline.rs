//! Processing stages shared by every connector

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use super::context::ProcessingContext;
use super::dispatcher::Dispatcher;
use super::extension::ExtensionRegistry;
use super::inbound::InboundProcessor;
use super::outbound::OutboundProcessor;
use super::status::StatusRegistry;
use crate::mapping::{Api, MappingStore};
use crate::platform::PlatformClient;

pub struct Pipeline {
    store: Arc<MappingStore>,
    inbound: InboundProcessor,
    outbound: OutboundProcessor,
    dispatcher: Dispatcher,
    status: StatusRegistry,
    workers: usize,
}

impl Pipeline {
    pub fn new<P>(
        store: Arc<MappingStore>,
        extensions: Arc<ExtensionRegistry>,
        platform: Arc<P>,
        workers: usize,
        send_inbound: bool,
    ) -> Self
    where
        P: PlatformClient + 'static,
    {
        let inbound = InboundProcessor::new(store.clone(), extensions, platform.clone())
            .with_send_payload(send_inbound);
        Self {
            outbound: OutboundProcessor::new(store.clone()),
            dispatcher: Dispatcher::new(platform, workers),
            status: StatusRegistry::new(),
            workers: workers.max(1),
            store,
            inbound,
        }
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    /// Upper bound on concurrent work
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run a broker message through every matching mapping and wait until
    /// all resulting platform requests have completed
    pub async fn handle_message(
        &self,
        topic: &str,
        payload: Bytes,
        qos: u8,
    ) -> Vec<ProcessingContext> {
        let contexts = self.inbound.process(topic, payload, qos).await;
        let contexts = self.dispatcher.dispatch_inbound(contexts).await;
        for ctx in &contexts {
            self.status.record(ctx);
        }
        contexts
    }

    /// Draft broker publishes for a platform event
    pub fn draft_outbound(&self, api: Api, event: &Value) -> Vec<ProcessingContext> {
        self.outbound.process(api, event)
    }
}
