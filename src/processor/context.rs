//! Per-message processing state

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use super::error::ProcessingError;
use crate::mapping::{Api, Mapping};
use crate::substitution::ProcessingType;

/// One drafted platform request, derived from one output document
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRequest {
    /// Position within the context's fan-out
    pub index: usize,
    /// Index of the request drafted before this one
    pub predecessor: Option<usize>,
    pub api: Api,
    /// Resolved internal device id
    pub source_id: Option<String>,
    pub external_id: Option<String>,
    pub external_id_type: Option<String>,
    pub document: Value,
    /// Platform response, once dispatched
    pub response: Option<Value>,
    pub error: Option<ProcessingError>,
}

impl TargetRequest {
    pub fn new(index: usize, api: Api, document: Value) -> Self {
        Self {
            index,
            predecessor: index.checked_sub(1),
            api,
            source_id: None,
            external_id: None,
            external_id_type: None,
            document,
            response: None,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// State of one (message, mapping) pair as it moves through the pipeline
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub mapping: Arc<Mapping>,
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    /// Deserialized payload
    pub document: Option<Value>,
    /// Values produced per target path
    pub cardinality: BTreeMap<String, usize>,
    pub needs_repair: bool,
    pub processing_type: ProcessingType,
    pub requests: Vec<TargetRequest>,
    pub errors: Vec<ProcessingError>,
    /// Device identity of the first document
    pub source_id: Option<String>,
    /// Whether drafted requests are sent to the platform
    pub send_payload: bool,
    /// Publish topic with wildcards resolved (outbound only)
    pub resolved_publish_topic: Option<String>,
}

impl ProcessingContext {
    pub fn new(mapping: Arc<Mapping>, topic: impl Into<String>, payload: Bytes, qos: u8) -> Self {
        Self {
            mapping,
            topic: topic.into(),
            payload,
            qos,
            document: None,
            cardinality: BTreeMap::new(),
            needs_repair: false,
            processing_type: ProcessingType::Undefined,
            requests: Vec::new(),
            errors: Vec::new(),
            source_id: None,
            send_payload: true,
            resolved_publish_topic: None,
        }
    }

    /// First error recorded on the context
    pub fn error(&self) -> Option<&ProcessingError> {
        self.errors.first()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.requests.iter().any(|r| !r.is_ok())
    }

    pub fn record_error(&mut self, error: ProcessingError) {
        self.errors.push(error);
    }

    /// Append a request, linking it to the previous one
    pub fn add_request(&mut self, mut request: TargetRequest) -> usize {
        let index = self.requests.len();
        request.index = index;
        request.predecessor = index.checked_sub(1);
        self.requests.push(request);
        index
    }

    pub fn current_request(&self) -> Option<&TargetRequest> {
        self.requests.last()
    }

    pub fn mapping_id(&self) -> &str {
        &self.mapping.id
    }
}
