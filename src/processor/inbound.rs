//! Inbound pipeline: broker message to platform requests

use std::sync::Arc;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::context::{ProcessingContext, TargetRequest};
use super::deserializer;
use super::error::{ProcessingError, Result};
use super::extension::ExtensionRegistry;
use crate::mapping::{Mapping, MappingStore, MappingType};
use crate::platform::IdentityResolver;
use crate::substitution::{apply_to_document, extract, reconcile, Extraction, JsonPath};
use crate::topic::split_topic_excluding_separator;

/// Key under which topic levels are injected into source documents
pub const TOPIC_LEVEL: &str = "_TOPIC_LEVEL_";

const TIME_KEY: &str = "time";

/// Identity of the device one document is addressed to
#[derive(Debug, Clone)]
struct Identity {
    source_id: String,
    external_id: Option<String>,
}

/// Runs every matching mapping over a broker message
pub struct InboundProcessor {
    store: Arc<MappingStore>,
    extensions: Arc<ExtensionRegistry>,
    identity: Arc<dyn IdentityResolver>,
    send_payload: bool,
}

impl InboundProcessor {
    pub fn new(
        store: Arc<MappingStore>,
        extensions: Arc<ExtensionRegistry>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            store,
            extensions,
            identity,
            send_payload: true,
        }
    }

    /// Whether drafted requests should be sent to the platform
    pub fn with_send_payload(mut self, send_payload: bool) -> Self {
        self.send_payload = send_payload;
        self
    }

    /// Process a message against all mappings resolved for its topic.
    /// A failing mapping never affects the others.
    pub async fn process(&self, topic: &str, payload: Bytes, qos: u8) -> Vec<ProcessingContext> {
        let mappings = self.store.resolve_inbound(topic);
        if mappings.is_empty() {
            debug!("Inbound: no mapping for topic '{}'", topic);
            return Vec::new();
        }

        let mut contexts = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            contexts.push(
                self.process_mapping(mapping, topic, payload.clone(), qos)
                    .await,
            );
        }
        contexts
    }

    /// Process a message with one mapping
    pub async fn process_mapping(
        &self,
        mapping: Arc<Mapping>,
        topic: &str,
        payload: Bytes,
        qos: u8,
    ) -> ProcessingContext {
        let mut ctx = ProcessingContext::new(mapping, topic, payload, qos);
        ctx.send_payload = self.send_payload;

        if let Err(e) = self.run(&mut ctx).await {
            warn!("Mapping '{}': {} (topic '{}')", ctx.mapping.id, e, ctx.topic);
            ctx.record_error(e);
        }

        debug!(
            "Mapping '{}': {} request(s), {} error(s), {:?}",
            ctx.mapping.id,
            ctx.requests.len(),
            ctx.errors.len(),
            ctx.processing_type
        );
        ctx
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let extraction = self.extract(ctx)?;

        let plan = reconcile(&extraction);
        ctx.cardinality = extraction.cardinality();
        ctx.needs_repair = plan.needs_repair;
        ctx.processing_type = plan.processing_type;
        if plan.needs_repair {
            debug!(
                "Mapping '{}': repairing cardinality {:?} to {} document(s)",
                ctx.mapping.id, ctx.cardinality, plan.documents
            );
        }

        let identities = self.resolve_identities(&ctx.mapping, &extraction).await;

        let template: Value = serde_json::from_str(&ctx.mapping.target_template)
            .map_err(|e| ProcessingError::Deserialize(format!("target template: {}", e)))?;
        let identity_path = JsonPath::parse(&ctx.mapping.generic_device_identifier)?;
        let inject_time = template.get(TIME_KEY).is_some()
            && extraction.targets().all(|(target, _)| target != TIME_KEY);

        for index in 0..plan.documents {
            let identity = match identities.get(index).or_else(|| identities.last()) {
                Some(Ok(identity)) => Some(identity.clone()),
                Some(Err(e)) => {
                    ctx.record_error(e.clone());
                    continue;
                }
                None => None,
            };

            let mut document = template.clone();
            if let Err(e) = draft_document(
                &mut document,
                &extraction,
                index,
                identity.as_ref(),
                &identity_path,
            ) {
                debug!("Mapping '{}': document {} skipped: {}", ctx.mapping.id, index, e);
                ctx.record_error(e);
                continue;
            }

            if inject_time {
                if let Some(fields) = document.as_object_mut() {
                    fields.insert(
                        TIME_KEY.to_string(),
                        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                    );
                }
            }

            let mut request = TargetRequest::new(index, ctx.mapping.target_api, document);
            if let Some(identity) = identity {
                if ctx.source_id.is_none() {
                    ctx.source_id = Some(identity.source_id.clone());
                }
                request.source_id = Some(identity.source_id);
                if ctx.mapping.map_device_identifier {
                    request.external_id_type = Some(ctx.mapping.external_id_type.clone());
                }
                request.external_id = identity.external_id;
            }
            ctx.add_request(request);
        }

        Ok(())
    }

    fn extract(&self, ctx: &mut ProcessingContext) -> Result<Extraction> {
        let mapping_type = ctx.mapping.mapping_type;
        if mapping_type == MappingType::ProcessorExtension {
            return self.extensions.extract(ctx);
        }

        let deserializer = deserializer::for_type(mapping_type)
            .ok_or(ProcessingError::UnsupportedFormat(mapping_type))?;
        let mut document = deserializer.deserialize(&ctx.payload)?;
        inject_topic_levels(&mut document, &ctx.topic);

        let extraction = extract(&ctx.mapping, &document)?;
        ctx.document = Some(document);
        Ok(extraction)
    }

    /// One identity per identifier value, resolved before any document is drafted
    async fn resolve_identities(
        &self,
        mapping: &Mapping,
        extraction: &Extraction,
    ) -> Vec<Result<Identity>> {
        let mut identities = Vec::new();
        for value in extraction.identifier_values() {
            let raw = match &value.value {
                Value::String(s) => s.clone(),
                Value::Null => {
                    identities.push(Err(ProcessingError::Identity(
                        "device identifier is missing".to_string(),
                    )));
                    continue;
                }
                other => other.to_string(),
            };
            identities.push(self.resolve_identity(mapping, raw).await);
        }
        identities
    }

    async fn resolve_identity(&self, mapping: &Mapping, external_id: String) -> Result<Identity> {
        if !mapping.map_device_identifier {
            return Ok(Identity {
                source_id: external_id,
                external_id: None,
            });
        }

        let id_type = &mapping.external_id_type;
        let source_id = match self.identity.resolve_external_id(id_type, &external_id).await? {
            Some(id) => id,
            None if mapping.create_non_existing_device => {
                let name = format!("device_{}_{}", id_type, external_id);
                debug!(
                    "Mapping '{}': creating device '{}' for {} '{}'",
                    mapping.id, name, id_type, external_id
                );
                self.identity
                    .create_device(id_type, &external_id, &name)
                    .await?
            }
            None => {
                return Err(ProcessingError::Identity(format!(
                    "no device registered for {} '{}'",
                    id_type, external_id
                )))
            }
        };

        Ok(Identity {
            source_id,
            external_id: Some(external_id),
        })
    }
}

/// Expose topic levels to substitution paths as `_TOPIC_LEVEL_[n]`
fn inject_topic_levels(document: &mut Value, topic: &str) {
    if let Some(fields) = document.as_object_mut() {
        let levels: Vec<Value> = split_topic_excluding_separator(topic)
            .into_iter()
            .map(Value::String)
            .collect();
        fields.insert(TOPIC_LEVEL.to_string(), Value::Array(levels));
    }
}

fn draft_document(
    document: &mut Value,
    extraction: &Extraction,
    index: usize,
    identity: Option<&Identity>,
    identity_path: &JsonPath,
) -> Result<()> {
    for (target, value) in extraction.document(index) {
        apply_to_document(document, target, value)?;
    }
    if let Some(identity) = identity {
        identity_path.set(document, json!(identity.source_id), true)?;
    }
    Ok(())
}
