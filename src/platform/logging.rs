//! Logging platform used by the binary

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{PlatformClient, PlatformError};
use crate::processor::TargetRequest;

/// Logs every request and hands out sequential ids.
/// External ids resolve to themselves.
#[derive(Default)]
pub struct LoggingPlatform {
    next_id: AtomicU64,
}

impl LoggingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

#[async_trait]
impl PlatformClient for LoggingPlatform {
    async fn create_or_update(&self, request: &TargetRequest) -> Result<Value, PlatformError> {
        let id = self.allocate_id();
        info!(
            "Platform: {} #{} for '{}': {}",
            request.api,
            id,
            request.source_id.as_deref().unwrap_or("-"),
            request.document
        );
        Ok(json!({ "id": id }))
    }

    async fn resolve_external_id(
        &self,
        _external_id_type: &str,
        external_id: &str,
    ) -> Result<Option<String>, PlatformError> {
        Ok(Some(external_id.to_string()))
    }

    async fn create_device(
        &self,
        external_id_type: &str,
        external_id: &str,
        name: &str,
    ) -> Result<String, PlatformError> {
        let id = self.allocate_id();
        info!(
            "Platform: created device '{}' ({} {}) as #{}",
            name, external_id_type, external_id, id
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Api;

    #[test]
    fn test_sequential_ids() {
        let platform = LoggingPlatform::new();
        let request = TargetRequest::new(0, Api::Event, json!({"text": "door open"}));

        let first = tokio_test::block_on(platform.create_or_update(&request)).unwrap();
        let device = tokio_test::block_on(platform.create_device("c8y_Serial", "sn-1", "dev")).unwrap();
        assert_eq!(first, json!({"id": "1"}));
        assert_eq!(device, "2");
    }

    #[test]
    fn test_external_ids_resolve_to_themselves() {
        let platform = LoggingPlatform::new();
        let resolved =
            tokio_test::block_on(platform.resolve_external_id("c8y_Serial", "sn-9")).unwrap();
        assert_eq!(resolved.as_deref(), Some("sn-9"));
    }
}
