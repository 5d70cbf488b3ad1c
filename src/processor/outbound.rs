//! Outbound pipeline: platform event to broker publish

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use super::context::{ProcessingContext, TargetRequest};
use super::error::{ProcessingError, Result};
use super::inbound::TOPIC_LEVEL;
use crate::mapping::{Api, MappingStore};
use crate::substitution::{apply_to_document, extract};
use crate::topic::{split_topic_including_separator, SEPARATOR, WILDCARD_SINGLE};

/// Drafts broker publishes for platform events
pub struct OutboundProcessor {
    store: Arc<MappingStore>,
}

impl OutboundProcessor {
    pub fn new(store: Arc<MappingStore>) -> Self {
        Self { store }
    }

    /// One context per outbound mapping whose filter matches the event
    pub fn process(&self, api: Api, event: &Value) -> Vec<ProcessingContext> {
        let mappings = self.store.resolve_outbound(api, event);
        if mappings.is_empty() {
            debug!("Outbound: no mapping for {} event", api);
        }

        mappings
            .into_iter()
            .map(|mapping| {
                let topic = mapping.publish_topic.clone();
                let qos = mapping.qos;
                let payload = Bytes::from(event.to_string());
                let mut ctx = ProcessingContext::new(mapping, topic, payload, qos);
                ctx.document = Some(event.clone());

                if let Err(e) = run(&mut ctx, event) {
                    warn!("Mapping '{}': {}", ctx.mapping.id, e);
                    ctx.record_error(e);
                }
                ctx
            })
            .collect()
    }
}

fn run(ctx: &mut ProcessingContext, event: &Value) -> Result<()> {
    let extraction = extract(&ctx.mapping, event)?;
    ctx.cardinality = extraction.cardinality();

    let mut document: Value = serde_json::from_str(&ctx.mapping.target_template)
        .map_err(|e| ProcessingError::Deserialize(format!("target template: {}", e)))?;

    let levels = publish_levels(&ctx.mapping.publish_topic);
    if let Some(fields) = document.as_object_mut() {
        let levels = levels.iter().cloned().map(Value::String).collect();
        fields.insert(TOPIC_LEVEL.to_string(), Value::Array(levels));
    }

    for (target, value) in extraction.document(0) {
        apply_to_document(&mut document, target, value)?;
    }

    let overrides = document
        .as_object_mut()
        .and_then(|fields| fields.remove(TOPIC_LEVEL));
    let topic = resolve_publish_topic(&ctx.mapping.publish_topic, overrides.as_ref());
    if topic
        .split(SEPARATOR)
        .any(|level| level == WILDCARD_SINGLE)
    {
        ctx.record_error(ProcessingError::Publish(format!(
            "unresolved wildcard in publish topic '{}'",
            topic
        )));
    }

    ctx.resolved_publish_topic = Some(topic);
    ctx.add_request(TargetRequest::new(0, ctx.mapping.target_api, document));
    Ok(())
}

fn publish_levels(publish_topic: &str) -> Vec<String> {
    split_topic_including_separator(publish_topic)
        .into_iter()
        .filter(|part| *part != "/")
        .map(str::to_string)
        .collect()
}

/// Rebuild a publish topic, replacing levels with the strings in `overrides`
fn resolve_publish_topic(publish_topic: &str, overrides: Option<&Value>) -> String {
    let overrides = overrides.and_then(Value::as_array);
    let mut level = 0;
    let mut topic = String::with_capacity(publish_topic.len());

    for part in split_topic_including_separator(publish_topic) {
        if part == "/" {
            topic.push(SEPARATOR);
            continue;
        }
        match overrides.and_then(|o| o.get(level)) {
            Some(Value::String(s)) if !s.is_empty() => topic.push_str(s),
            Some(Value::Number(n)) => topic.push_str(&n.to_string()),
            _ => topic.push_str(part),
        }
        level += 1;
    }
    topic
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_publish_topic() {
        let overrides = json!(["out", "dev-7", "temp"]);
        assert_eq!(
            resolve_publish_topic("/out/+/temp", Some(&overrides)),
            "/out/dev-7/temp"
        );
        assert_eq!(resolve_publish_topic("/out/+/temp", None), "/out/+/temp");
        assert_eq!(
            resolve_publish_topic("out/+", Some(&json!(["out", 12]))),
            "out/12"
        );
    }

    #[test]
    fn test_publish_levels() {
        assert_eq!(publish_levels("/a/+/c"), vec!["a", "+", "c"]);
    }
}
