//! Per-mapping processing counters

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::context::ProcessingContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingStatus {
    pub messages_received: u64,
    pub documents_created: u64,
    pub errors: u64,
    /// Whether the last message needed cardinality repair
    pub needs_repair: bool,
    pub last_error: Option<String>,
    pub last_update: Option<String>,
}

#[derive(Debug, Default)]
pub struct StatusRegistry {
    entries: DashMap<String, MappingStatus>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished context into its mapping's counters
    pub fn record(&self, ctx: &ProcessingContext) {
        let mut status = self.entries.entry(ctx.mapping.id.clone()).or_default();

        let failed: Vec<String> = ctx
            .errors
            .iter()
            .chain(ctx.requests.iter().filter_map(|r| r.error.as_ref()))
            .map(ToString::to_string)
            .collect();
        let created = ctx.requests.iter().filter(|r| r.is_ok()).count();

        status.messages_received += 1;
        status.documents_created += created as u64;
        status.errors += failed.len() as u64;
        status.needs_repair = ctx.needs_repair;
        if let Some(last) = failed.into_iter().last() {
            status.last_error = Some(last);
        }
        status.last_update = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    }

    pub fn get(&self, mapping_id: &str) -> Option<MappingStatus> {
        self.entries.get(mapping_id).map(|s| s.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, MappingStatus> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Clear the counters of one mapping
    pub fn reset(&self, mapping_id: &str) {
        if let Some(mut status) = self.entries.get_mut(mapping_id) {
            *status = MappingStatus::default();
        }
    }

    pub fn remove(&self, mapping_id: &str) {
        self.entries.remove(mapping_id);
    }
}
