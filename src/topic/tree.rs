//! Mapping topic tree
//!
//! A prefix tree over subscription-topic levels. Resolution walks the
//! incoming topic once, so its cost depends on topic depth and not on the
//! number of registered mappings.
//!
//! Resolution order at every level:
//! - literal child
//! - single-level wildcard (+) child
//! - multi-level wildcard (#) leaf, matching the remaining levels
//!
//! The first leaf reached in that order wins; its mappings are returned in
//! insertion order.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use compact_str::CompactString;
use smallvec::SmallVec;

use super::{normalize_topic, pattern_levels, SEPARATOR, WILDCARD_MULTI, WILDCARD_SINGLE};
use crate::mapping::{Direction, Mapping};

/// Error raised when a mapping cannot be indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Only active inbound mappings are indexed
    NotInbound(String),
    /// Subscription topic is malformed
    InvalidPattern { topic: String, reason: &'static str },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::NotInbound(id) => write!(f, "mapping '{}' is not an active inbound mapping", id),
            TreeError::InvalidPattern { topic, reason } => {
                write!(f, "invalid subscription topic '{}': {}", topic, reason)
            }
        }
    }
}

impl std::error::Error for TreeError {}

type Leaf = Vec<Arc<Mapping>>;

#[derive(Debug)]
struct TreeNode {
    /// Mappings whose subscription topic ends at this node
    mappings: Leaf,
    /// Children indexed by literal topic level
    children: AHashMap<CompactString, TreeNode>,
    /// Single-level wildcard (+) child
    single_wildcard: Option<Box<TreeNode>>,
    /// Mappings whose subscription topic ends with # below this node
    multi_wildcard: Leaf,
}

impl TreeNode {
    fn new() -> Self {
        Self {
            mappings: Vec::new(),
            children: AHashMap::with_capacity(4),
            single_wildcard: None,
            multi_wildcard: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.mappings.is_empty()
            && self.multi_wildcard.is_empty()
            && self.children.is_empty()
            && self.single_wildcard.is_none()
    }
}

impl Default for TreeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace a mapping with the same id in place, or append it.
/// Returns true if the mapping was new to the leaf.
fn upsert_leaf(leaf: &mut Leaf, mapping: Arc<Mapping>) -> bool {
    match leaf.iter_mut().find(|m| m.id == mapping.id) {
        Some(existing) => {
            *existing = mapping;
            false
        }
        None => {
            leaf.push(mapping);
            true
        }
    }
}

fn remove_from_leaf(leaf: &mut Leaf, id: &str) -> bool {
    let before = leaf.len();
    leaf.retain(|m| m.id != id);
    leaf.len() != before
}

/// Index of active inbound mappings keyed by subscription-topic levels
#[derive(Debug, Default)]
pub struct MappingTopicTree {
    root: TreeNode,
    count: usize,
}

impl MappingTopicTree {
    pub fn new() -> Self {
        Self {
            root: TreeNode::new(),
            count: 0,
        }
    }

    /// Number of indexed mappings
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Index a mapping under its subscription topic
    pub fn insert(&mut self, mapping: Arc<Mapping>) -> Result<(), TreeError> {
        if mapping.direction != Direction::Inbound || !mapping.active {
            return Err(TreeError::NotInbound(mapping.id.clone()));
        }

        let topic = normalize_topic(&mapping.subscription_topic);
        let levels = pattern_levels(&topic).map_err(|reason| TreeError::InvalidPattern {
            topic: mapping.subscription_topic.clone(),
            reason,
        })?;

        let mut node = &mut self.root;
        for level in levels.iter() {
            match *level {
                WILDCARD_MULTI => {
                    if upsert_leaf(&mut node.multi_wildcard, mapping) {
                        self.count += 1;
                    }
                    return Ok(());
                }
                WILDCARD_SINGLE => {
                    node = &mut **node
                        .single_wildcard
                        .get_or_insert_with(|| Box::new(TreeNode::new()));
                }
                literal => {
                    node = node.children.entry(CompactString::new(literal)).or_default();
                }
            }
        }

        if upsert_leaf(&mut node.mappings, mapping) {
            self.count += 1;
        }
        Ok(())
    }

    /// Remove a mapping from the leaf of its subscription topic.
    /// Empty branches are pruned.
    pub fn remove(&mut self, mapping: &Mapping) -> bool {
        let topic = normalize_topic(&mapping.subscription_topic);
        let levels = match pattern_levels(&topic) {
            Ok(levels) => levels,
            Err(_) => return false,
        };

        let removed = Self::remove_recursive(&mut self.root, &levels, &mapping.id);
        if removed {
            self.count -= 1;
        }
        removed
    }

    fn remove_recursive(node: &mut TreeNode, levels: &[&str], id: &str) -> bool {
        let Some((level, rest)) = levels.split_first() else {
            return remove_from_leaf(&mut node.mappings, id);
        };

        match *level {
            WILDCARD_MULTI => remove_from_leaf(&mut node.multi_wildcard, id),
            WILDCARD_SINGLE => {
                let Some(child) = node.single_wildcard.as_mut() else {
                    return false;
                };
                let removed = Self::remove_recursive(child, rest, id);
                if child.is_empty() {
                    node.single_wildcard = None;
                }
                removed
            }
            literal => {
                let Some(child) = node.children.get_mut(literal) else {
                    return false;
                };
                let removed = Self::remove_recursive(child, rest, id);
                if child.is_empty() {
                    node.children.remove(literal);
                }
                removed
            }
        }
    }

    /// Resolve the mappings for an arriving topic
    pub fn resolve(&self, topic: &str) -> Vec<Arc<Mapping>> {
        let mut topic = normalize_topic(topic);
        if topic.is_empty() {
            topic.push(SEPARATOR);
        }
        if topic.len() > 1 && topic.ends_with(SEPARATOR) {
            topic.pop();
        }

        let levels: SmallVec<[&str; 8]> = topic.split(SEPARATOR).collect();
        Self::resolve_recursive(&self.root, &levels)
            .map(|leaf| leaf.to_vec())
            .unwrap_or_default()
    }

    fn resolve_recursive<'a>(node: &'a TreeNode, levels: &[&str]) -> Option<&'a Leaf> {
        let Some((level, rest)) = levels.split_first() else {
            return (!node.mappings.is_empty()).then_some(&node.mappings);
        };

        if let Some(child) = node.children.get(*level) {
            if let Some(leaf) = Self::resolve_recursive(child, rest) {
                return Some(leaf);
            }
        }

        if let Some(ref child) = node.single_wildcard {
            if let Some(leaf) = Self::resolve_recursive(child, rest) {
                return Some(leaf);
            }
        }

        (!node.multi_wildcard.is_empty()).then_some(&node.multi_wildcard)
    }

    /// All indexed mappings, ordered by id
    pub fn mappings(&self) -> Vec<Arc<Mapping>> {
        let mut result = Vec::with_capacity(self.count);
        Self::collect(&self.root, &mut result);
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    fn collect(node: &TreeNode, out: &mut Vec<Arc<Mapping>>) {
        out.extend(node.mappings.iter().cloned());
        out.extend(node.multi_wildcard.iter().cloned());
        if let Some(ref child) = node.single_wildcard {
            Self::collect(child, out);
        }
        for child in node.children.values() {
            Self::collect(child, out);
        }
    }

    pub fn clear(&mut self) {
        self.root = TreeNode::new();
        self.count = 0;
    }
}
