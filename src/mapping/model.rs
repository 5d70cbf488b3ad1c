//! Mapping definitions
//!
//! Mappings arrive from the control plane as JSON documents with
//! camelCase keys and are immutable once accepted by the store.

use serde::{Deserialize, Serialize};

use crate::substitution::ValueType;

/// Direction of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Broker message to platform document
    #[default]
    Inbound,
    /// Platform event to broker message
    Outbound,
}

/// Platform API a mapping targets (inbound) or listens to (outbound)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Api {
    #[default]
    Measurement,
    Event,
    Alarm,
    Inventory,
    Operation,
}

impl std::fmt::Display for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Api::Measurement => write!(f, "MEASUREMENT"),
            Api::Event => write!(f, "EVENT"),
            Api::Alarm => write!(f, "ALARM"),
            Api::Inventory => write!(f, "INVENTORY"),
            Api::Operation => write!(f, "OPERATION"),
        }
    }
}

/// Wire format of the source payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingType {
    #[default]
    Json,
    /// Plain text, wrapped as `{"message": text}`
    FlatFile,
    /// Binary, hex encoded into `{"message": "<hex>"}`
    Hex,
    /// Binary without a known layout, treated like `Hex`
    GenericBinary,
    /// Payload extraction delegated to a registered extension
    ProcessorExtension,
}

/// Policy for missing values and mismatched cardinalities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairStrategy {
    /// A value is required; the target path must exist in the template
    #[default]
    Default,
    /// Collapse an array result to its first element
    UseFirstValueOfArray,
    /// Collapse an array result to its last element
    UseLastValueOfArray,
    /// Remove the target path when the value is missing or null
    RemoveIfMissingOrNull,
    /// Write the target path, creating intermediate containers
    CreateIfMissing,
}

/// One source-path to target-path rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    pub path_source: String,
    pub path_target: String,
    #[serde(default)]
    pub repair_strategy: RepairStrategy,
    /// Expand an array value into one value per element
    #[serde(default)]
    pub expand_array: bool,
    /// This rule yields the device identity
    #[serde(default, alias = "definesDeviceIdentifier")]
    pub defines_identifier: bool,
    /// Declared type of the extracted value
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
}

impl Substitution {
    pub fn new(path_source: impl Into<String>, path_target: impl Into<String>) -> Self {
        Self {
            path_source: path_source.into(),
            path_target: path_target.into(),
            repair_strategy: RepairStrategy::Default,
            expand_array: false,
            defines_identifier: false,
            value_type: None,
        }
    }

    pub fn identifier(mut self) -> Self {
        self.defines_identifier = true;
        self
    }

    pub fn with_strategy(mut self, strategy: RepairStrategy) -> Self {
        self.repair_strategy = strategy;
        self
    }

    pub fn expanded(mut self) -> Self {
        self.expand_array = true;
        self
    }

    pub fn typed(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_qos() -> u8 {
    1
}

fn default_template() -> String {
    "{}".to_string()
}

fn default_external_id_type() -> String {
    "c8y_Serial".to_string()
}

fn default_generic_device_identifier() -> String {
    "source.id".to_string()
}

/// A declarative mapping between a broker topic/payload and a platform document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_true")]
    pub active: bool,
    /// QoS used when subscribing (inbound) or publishing (outbound)
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Subscription pattern, `+` and trailing `#` allowed
    #[serde(default)]
    pub subscription_topic: String,
    /// Concrete example topic covered by the subscription topic
    #[serde(default)]
    pub template_topic: String,
    /// Topic outbound messages are published to
    #[serde(default)]
    pub publish_topic: String,
    /// Fragment that must exist in a platform event for an outbound mapping to apply
    #[serde(default)]
    pub filter_outbound: String,
    #[serde(default, rename = "targetAPI", alias = "targetApi")]
    pub target_api: Api,
    /// Example source payload
    #[serde(default = "default_template", rename = "source")]
    pub source_template: String,
    /// Target document template
    #[serde(default = "default_template", rename = "target")]
    pub target_template: String,
    #[serde(default)]
    pub mapping_type: MappingType,
    /// Registered extension for `PROCESSOR_EXTENSION` mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_name: Option<String>,
    #[serde(default)]
    pub substitutions: Vec<Substitution>,
    /// Resolve the identifier through the external-id registry
    #[serde(default, alias = "useExternalId")]
    pub map_device_identifier: bool,
    #[serde(default = "default_external_id_type")]
    pub external_id_type: String,
    #[serde(default)]
    pub create_non_existing_device: bool,
    /// Target path written with the resolved device identity
    #[serde(default = "default_generic_device_identifier")]
    pub generic_device_identifier: String,
    #[serde(default)]
    pub last_update: i64,
}

impl Mapping {
    /// Minimal active inbound JSON mapping on a subscription topic
    pub fn inbound(id: impl Into<String>, subscription_topic: impl Into<String>) -> Self {
        let subscription_topic = subscription_topic.into();
        Self {
            id: id.into(),
            name: String::new(),
            direction: Direction::Inbound,
            active: true,
            qos: default_qos(),
            template_topic: subscription_topic.replace('#', "sample"),
            subscription_topic,
            publish_topic: String::new(),
            filter_outbound: String::new(),
            target_api: Api::Measurement,
            source_template: default_template(),
            target_template: default_template(),
            mapping_type: MappingType::Json,
            extension_name: None,
            substitutions: Vec::new(),
            map_device_identifier: false,
            external_id_type: default_external_id_type(),
            create_non_existing_device: false,
            generic_device_identifier: default_generic_device_identifier(),
            last_update: 0,
        }
    }

    /// Minimal active outbound mapping
    pub fn outbound(
        id: impl Into<String>,
        api: Api,
        filter_outbound: impl Into<String>,
        publish_topic: impl Into<String>,
    ) -> Self {
        Self {
            direction: Direction::Outbound,
            target_api: api,
            filter_outbound: filter_outbound.into(),
            publish_topic: publish_topic.into(),
            subscription_topic: String::new(),
            template_topic: String::new(),
            ..Self::inbound(id, "")
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// The rule defining the device identity, if any
    pub fn identifier_substitution(&self) -> Option<&Substitution> {
        self.substitutions.iter().find(|s| s.defines_identifier)
    }

    /// Order substitutions so the identifier rule is evaluated first.
    /// The relative order of the remaining rules is kept.
    pub fn sort_substitutions(&mut self) {
        self.substitutions
            .sort_by_key(|s| if s.defines_identifier { 0 } else { 1 });
    }
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}
