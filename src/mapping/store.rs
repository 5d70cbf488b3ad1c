//! Mapping store
//!
//! Owns every accepted mapping. Inbound mappings are indexed in the topic
//! tree and outbound mappings are kept in a list matched by fragment. All
//! three views sit behind one lock so a resolve never sees a mapping that is
//! only partially swapped in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::model::{Api, Direction, Mapping};
use super::validation::ValidationError;
use crate::substitution::JsonPath;
use crate::topic::{normalize_topic, MappingTopicTree, TreeError};

/// Reason a mapping was not accepted
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Mapping failed validation
    Invalid(Vec<ValidationError>),
    /// Mapping could not be indexed
    Index(TreeError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Invalid(errors) => {
                let codes: Vec<&str> = errors.iter().map(ValidationError::code).collect();
                write!(f, "Validation failed: {}", codes.join(", "))
            }
            StoreError::Index(e) => write!(f, "Index error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<TreeError> for StoreError {
    fn from(e: TreeError) -> Self {
        StoreError::Index(e)
    }
}

/// Result of a successful upsert
#[derive(Debug, Clone)]
pub struct Upserted {
    pub mapping: Arc<Mapping>,
    pub previous: Option<Arc<Mapping>>,
}

/// Outcome of loading a batch of mapping definitions
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: usize,
    pub rejected: Vec<(String, StoreError)>,
}

#[derive(Default)]
struct StoreState {
    tree: MappingTopicTree,
    outbound: Vec<Arc<Mapping>>,
    by_id: HashMap<String, Arc<Mapping>>,
}

impl StoreState {
    fn unindex(&mut self, mapping: &Mapping) {
        match mapping.direction {
            Direction::Inbound => {
                self.tree.remove(mapping);
            }
            Direction::Outbound => self.outbound.retain(|m| m.id != mapping.id),
        }
    }

    fn index(&mut self, mapping: &Arc<Mapping>) -> Result<(), TreeError> {
        if !mapping.active {
            return Ok(());
        }
        match mapping.direction {
            Direction::Inbound => self.tree.insert(mapping.clone()),
            Direction::Outbound => {
                self.outbound.push(mapping.clone());
                Ok(())
            }
        }
    }
}

/// Thread-safe store of mapping definitions
#[derive(Default)]
pub struct MappingStore {
    state: RwLock<StoreState>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and accept a mapping, replacing any previous version
    pub fn upsert(&self, mut mapping: Mapping) -> Result<Upserted, StoreError> {
        if mapping.is_inbound() {
            mapping.subscription_topic = normalize_topic(&mapping.subscription_topic);
        }

        let errors = mapping.validate();
        if !errors.is_empty() {
            warn!("Mapping '{}': Rejected ({} errors)", mapping.id, errors.len());
            return Err(StoreError::Invalid(errors));
        }

        mapping.sort_substitutions();
        let mapping = Arc::new(mapping);

        let mut state = self.state.write();
        let previous = state.by_id.get(&mapping.id).cloned();
        if let Some(ref prev) = previous {
            state.unindex(prev);
        }
        if let Err(e) = state.index(&mapping) {
            // Keep the last good version reachable
            if let Some(ref prev) = previous {
                let _ = state.index(prev);
            }
            return Err(e.into());
        }
        state.by_id.insert(mapping.id.clone(), mapping.clone());
        drop(state);

        info!(
            "Mapping '{}': Accepted ({:?}, topic '{}', {} substitutions)",
            mapping.id,
            mapping.direction,
            mapping.subscription_topic,
            mapping.substitutions.len()
        );

        Ok(Upserted { mapping, previous })
    }

    /// Remove a mapping by id
    pub fn delete(&self, id: &str) -> Option<Arc<Mapping>> {
        let mut state = self.state.write();
        let removed = state.by_id.remove(id)?;
        state.unindex(&removed);
        drop(state);

        info!("Mapping '{}': Deleted", id);
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mapping>> {
        self.state.read().by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mappings for an inbound topic, most specific subscription first
    pub fn resolve_inbound(&self, topic: &str) -> Vec<Arc<Mapping>> {
        let resolved = self.state.read().tree.resolve(topic);
        debug!("Resolved {} mappings for topic '{}'", resolved.len(), topic);
        resolved
    }

    /// Active outbound mappings for a platform event of the given API whose
    /// filter fragment is present in the event
    pub fn resolve_outbound(&self, api: Api, event: &Value) -> Vec<Arc<Mapping>> {
        let state = self.state.read();
        state
            .outbound
            .iter()
            .filter(|m| m.target_api == api)
            .filter(|m| match JsonPath::parse(&m.filter_outbound) {
                Ok(path) => path.exists(event),
                Err(_) => false,
            })
            .cloned()
            .collect()
    }

    /// Snapshot of inbound mappings, active or not, ordered by id
    pub fn inbound_mappings(&self) -> Vec<Arc<Mapping>> {
        let mut result: Vec<_> = self
            .state
            .read()
            .by_id
            .values()
            .filter(|m| m.is_inbound())
            .cloned()
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Snapshot of all mappings, ordered by id
    pub fn all(&self) -> Vec<Arc<Mapping>> {
        let mut result: Vec<_> = self.state.read().by_id.values().cloned().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Load a JSON array of mapping definitions
    pub fn load_json(&self, content: &str) -> Result<LoadReport, serde_json::Error> {
        let mappings: Vec<Mapping> = serde_json::from_str(content)?;
        let mut report = LoadReport::default();

        for mapping in mappings {
            let id = mapping.id.clone();
            match self.upsert(mapping) {
                Ok(_) => report.accepted += 1,
                Err(e) => report.rejected.push((id, e)),
            }
        }

        Ok(report)
    }
}
