//! In-memory platform

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{PlatformClient, PlatformError};
use crate::processor::TargetRequest;

#[derive(Default)]
struct MemoryState {
    requests: Vec<TargetRequest>,
    external_ids: HashMap<(String, String), String>,
    devices: Vec<(String, String)>,
    failing_sources: HashSet<String>,
    next_id: u64,
}

impl MemoryState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

/// Platform that keeps everything in memory
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing device under an external id
    pub fn register_external_id(&self, external_id_type: &str, external_id: &str, id: &str) {
        self.state.lock().external_ids.insert(
            (external_id_type.to_string(), external_id.to_string()),
            id.to_string(),
        );
    }

    /// Reject every request addressed to `source_id`
    pub fn fail_source(&self, source_id: &str) {
        self.state
            .lock()
            .failing_sources
            .insert(source_id.to_string());
    }

    /// Requests accepted so far, in arrival order
    pub fn requests(&self) -> Vec<TargetRequest> {
        self.state.lock().requests.clone()
    }

    /// Devices created through `create_device` as (name, internal id)
    pub fn created_devices(&self) -> Vec<(String, String)> {
        self.state.lock().devices.clone()
    }
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    async fn create_or_update(&self, request: &TargetRequest) -> Result<Value, PlatformError> {
        let mut state = self.state.lock();
        if let Some(source) = &request.source_id {
            if state.failing_sources.contains(source) {
                return Err(PlatformError::Rejected {
                    status: 422,
                    message: format!("source '{}' rejected", source),
                });
            }
        }

        let id = state.allocate_id();
        state.requests.push(request.clone());

        let mut response = request.document.clone();
        if let Some(fields) = response.as_object_mut() {
            fields.insert("id".to_string(), json!(id));
        }
        Ok(response)
    }

    async fn resolve_external_id(
        &self,
        external_id_type: &str,
        external_id: &str,
    ) -> Result<Option<String>, PlatformError> {
        Ok(self
            .state
            .lock()
            .external_ids
            .get(&(external_id_type.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn create_device(
        &self,
        external_id_type: &str,
        external_id: &str,
        name: &str,
    ) -> Result<String, PlatformError> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.external_ids.insert(
            (external_id_type.to_string(), external_id.to_string()),
            id.clone(),
        );
        state.devices.push((name.to_string(), id.clone()));
        Ok(id)
    }
}
