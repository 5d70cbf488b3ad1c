//! Substitution engine
//!
//! Evaluates a mapping's rules against a source document, reconciles the
//! number of values each rule produced into a fan-out plan, and writes
//! values into target documents according to each rule's repair strategy.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use super::path::{JsonPath, PathError, Selection};
use super::value::PathValue;
use crate::mapping::{Mapping, RepairStrategy, Substitution};
use crate::processor::ProcessingError;

/// Classification of a fan-out by device and value multiplicity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingType {
    #[default]
    Undefined,
    OneDeviceOneValue,
    OneDeviceMultipleValue,
    MultipleDeviceOneValue,
    MultipleDeviceMultipleValue,
}

impl ProcessingType {
    pub fn classify(multiple_devices: bool, multiple_values: bool) -> Self {
        match (multiple_devices, multiple_values) {
            (false, false) => Self::OneDeviceOneValue,
            (false, true) => Self::OneDeviceMultipleValue,
            (true, false) => Self::MultipleDeviceOneValue,
            (true, true) => Self::MultipleDeviceMultipleValue,
        }
    }
}

/// Values extracted per target path, in rule order.
/// Every target holds at least one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    targets: Vec<(String, Vec<PathValue>)>,
    identifier: Option<String>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append values for a target; rules sharing a target accumulate
    pub fn extend(&mut self, target: &str, values: Vec<PathValue>) {
        if values.is_empty() {
            return;
        }
        match self.targets.iter_mut().find(|(t, _)| t == target) {
            Some((_, existing)) => existing.extend(values),
            None => self.targets.push((target.to_string(), values)),
        }
    }

    pub fn push(&mut self, target: &str, value: PathValue) {
        self.extend(target, vec![value]);
    }

    /// Mark the target receiving the device identity
    pub fn set_identifier(&mut self, target: &str) {
        self.identifier = Some(target.to_string());
    }

    pub fn identifier_path(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn identifier_values(&self) -> &[PathValue] {
        self.identifier
            .as_deref()
            .and_then(|id| self.values(id))
            .unwrap_or(&[])
    }

    pub fn values(&self, target: &str) -> Option<&[PathValue]> {
        self.targets
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, v)| v.as_slice())
    }

    pub(crate) fn values_mut(&mut self, target: &str) -> Option<&mut Vec<PathValue>> {
        self.targets
            .iter_mut()
            .find(|(t, _)| t == target)
            .map(|(_, v)| v)
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, &[PathValue])> {
        self.targets.iter().map(|(t, v)| (t.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Element count per target path
    pub fn cardinality(&self) -> BTreeMap<String, usize> {
        self.targets
            .iter()
            .map(|(t, v)| (t.clone(), v.len()))
            .collect()
    }

    /// Values for output document `index`; shorter rules repeat their last value
    pub fn document(&self, index: usize) -> impl Iterator<Item = (&str, &PathValue)> {
        self.targets.iter().filter_map(move |(t, values)| {
            values
                .get(index)
                .or_else(|| values.last())
                .map(|v| (t.as_str(), v))
        })
    }
}

/// How many documents a message produces and how they were derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutPlan {
    pub documents: usize,
    pub needs_repair: bool,
    pub processing_type: ProcessingType,
}

/// True iff the non-identifier targets disagree on their cardinality
pub fn needs_repair(cardinality: &BTreeMap<String, usize>, identifier: Option<&str>) -> bool {
    let distinct: BTreeSet<usize> = cardinality
        .iter()
        .filter(|(target, _)| Some(target.as_str()) != identifier)
        .map(|(_, count)| *count)
        .collect();
    distinct.len() > 1
}

/// Reconcile rule cardinalities into a fan-out plan.
///
/// The plan produces as many documents as the largest cardinality,
/// identifier included.
pub fn reconcile(extraction: &Extraction) -> FanOutPlan {
    let cardinality = extraction.cardinality();
    let identifier = extraction.identifier_path();

    let device_count = identifier
        .and_then(|id| cardinality.get(id).copied())
        .unwrap_or(1);
    let value_count = cardinality
        .iter()
        .filter(|(target, _)| Some(target.as_str()) != identifier)
        .map(|(_, count)| *count)
        .max()
        .unwrap_or(1);

    FanOutPlan {
        documents: device_count.max(value_count).max(1),
        needs_repair: needs_repair(&cardinality, identifier),
        processing_type: ProcessingType::classify(device_count > 1, value_count > 1),
    }
}

fn select_values(rule: &Substitution, payload: &Value) -> Result<Vec<Value>, PathError> {
    let path = JsonPath::parse(&rule.path_source)?;
    let collapse = matches!(
        rule.repair_strategy,
        RepairStrategy::UseFirstValueOfArray | RepairStrategy::UseLastValueOfArray
    );

    let mut values = match path.select(payload) {
        Selection::Missing => Vec::new(),
        Selection::One(Value::Array(items)) if rule.expand_array || collapse => items,
        Selection::One(value) => vec![value],
        Selection::Many(items) => items,
    };

    match rule.repair_strategy {
        RepairStrategy::UseFirstValueOfArray => values.truncate(1),
        RepairStrategy::UseLastValueOfArray => {
            if let Some(last) = values.pop() {
                values = vec![last];
            }
        }
        _ => {}
    }

    Ok(values)
}

/// Evaluate every substitution of a mapping against a source document.
///
/// A source that resolves to nothing contributes a single IGNORE value;
/// what that means for the document is decided by the rule's repair strategy.
pub fn extract(mapping: &Mapping, payload: &Value) -> Result<Extraction, PathError> {
    let mut extraction = Extraction::new();

    for rule in &mapping.substitutions {
        let selected = select_values(rule, payload)?;
        let values = if selected.is_empty() {
            vec![PathValue::for_rule(Value::Null, rule)]
        } else {
            selected
                .into_iter()
                .map(|v| PathValue::for_rule(v, rule))
                .collect()
        };

        extraction.extend(&rule.path_target, values);
        if rule.defines_identifier {
            extraction.set_identifier(&rule.path_target);
        }
    }

    Ok(extraction)
}

/// Write one value into a target document.
///
/// - `REMOVE_IF_MISSING_OR_NULL` removes the target when the value is missing
/// - `CREATE_IF_MISSING` writes the target, creating containers
/// - otherwise the target must already exist in the document
/// - the target `$` merges an object value into the document root
pub fn apply_to_document(
    document: &mut Value,
    target: &str,
    value: &PathValue,
) -> Result<(), ProcessingError> {
    let path = JsonPath::parse(target)?;

    if let Some((expected, found)) = value.type_mismatch() {
        return Err(ProcessingError::TypeMismatch {
            target: target.to_string(),
            expected,
            found,
        });
    }

    if value.is_missing() {
        match value.repair_strategy {
            RepairStrategy::RemoveIfMissingOrNull => {
                path.remove(document);
                return Ok(());
            }
            RepairStrategy::CreateIfMissing => {}
            _ => return Err(ProcessingError::MissingValue(target.to_string())),
        }
    }

    if path.is_root() {
        return match (&value.value, document.as_object_mut()) {
            (Value::Object(fields), Some(root)) => {
                for (key, v) in fields {
                    root.insert(key.clone(), v.clone());
                }
                Ok(())
            }
            _ => Err(ProcessingError::TypeMismatch {
                target: target.to_string(),
                expected: super::ValueType::Object,
                found: value.value_type,
            }),
        };
    }

    let create = value.repair_strategy == RepairStrategy::CreateIfMissing;
    path.set(document, value.value.clone(), create)?;
    Ok(())
}
