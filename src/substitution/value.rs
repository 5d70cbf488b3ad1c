//! Typed values extracted by substitution rules

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mapping::{RepairStrategy, Substitution};

/// Semantic type of an extracted value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Textual,
    Number,
    Boolean,
    Object,
    Array,
    /// Rule contributes no value (missing or null)
    Ignore,
}

impl ValueType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ValueType::Textual,
            Value::Number(_) => ValueType::Number,
            Value::Bool(_) => ValueType::Boolean,
            Value::Object(_) => ValueType::Object,
            Value::Array(_) => ValueType::Array,
            Value::Null => ValueType::Ignore,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Textual => "TEXTUAL",
            ValueType::Number => "NUMBER",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Object => "OBJECT",
            ValueType::Array => "ARRAY",
            ValueType::Ignore => "IGNORE",
        };
        f.write_str(name)
    }
}

/// One value produced by a rule, destined for a target path
#[derive(Debug, Clone, PartialEq)]
pub struct PathValue {
    pub value: Value,
    pub value_type: ValueType,
    pub repair_strategy: RepairStrategy,
    /// Type the rule declared, if any
    pub declared: Option<ValueType>,
}

impl PathValue {
    pub fn new(value: Value, repair_strategy: RepairStrategy) -> Self {
        Self {
            value_type: ValueType::of(&value),
            value,
            repair_strategy,
            declared: None,
        }
    }

    /// Placeholder for a rule whose source resolved to nothing
    pub fn ignore(repair_strategy: RepairStrategy) -> Self {
        Self::new(Value::Null, repair_strategy)
    }

    pub(crate) fn for_rule(value: Value, rule: &Substitution) -> Self {
        Self {
            declared: rule.value_type,
            ..Self::new(value, rule.repair_strategy)
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value_type == ValueType::Ignore
    }

    /// Declared and observed type, when they disagree
    pub fn type_mismatch(&self) -> Option<(ValueType, ValueType)> {
        match self.declared {
            Some(declared)
                if declared != ValueType::Ignore
                    && !self.is_missing()
                    && declared != self.value_type =>
            {
                Some((declared, self.value_type))
            }
            _ => None,
        }
    }
}
