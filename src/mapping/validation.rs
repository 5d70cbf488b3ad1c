//! Mapping validation
//!
//! Validation runs whenever a mapping is created or updated. A mapping with
//! any validation error never reaches the topic tree or the pipeline.

use std::fmt;

use super::model::{Mapping, MappingType};
use crate::substitution::JsonPath;
use crate::topic::{
    template_matches_subscription, validate_subscription_topic, validate_template_topic,
};

/// Named validation failures reported to the mapping owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationError {
    IdMustNotBeEmpty,
    SubscriptionTopicMustNotBeEmpty,
    OnlyOneMultiLevelWildcard,
    MultiLevelWildcardOnlyAtEnd,
    WildcardMustOccupyWholeLevel,
    TemplateTopicMustNotBeEmpty,
    NoMultiLevelWildcardAllowedInTemplateTopic,
    TemplateTopicMustMatchTheSubscriptionTopic,
    OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed,
    OneSubstitutionDefiningDeviceIdentifierMustBeUsed,
    SubstitutionPathMalformed,
    GenericDeviceIdentifierInvalid,
    PublishTopicMustNotBeEmpty,
    FilterOutboundMustNotBeEmpty,
    SourceTemplateInvalidJson,
    TargetTemplateInvalidJson,
    QosOutOfRange,
    ExtensionNameMissing,
}

impl ValidationError {
    /// Stable code shown to the mapping owner
    pub fn code(&self) -> &'static str {
        match self {
            Self::IdMustNotBeEmpty => "Id_Must_Not_Be_Empty",
            Self::SubscriptionTopicMustNotBeEmpty => "SubscriptionTopic_Must_Not_Be_Empty",
            Self::OnlyOneMultiLevelWildcard => "Only_One_Multi_Level_Wildcard",
            Self::MultiLevelWildcardOnlyAtEnd => "Multi_Level_Wildcard_Only_At_End",
            Self::WildcardMustOccupyWholeLevel => "Wildcard_Must_Occupy_Whole_Level",
            Self::TemplateTopicMustNotBeEmpty => "TemplateTopic_Must_Not_Be_Empty",
            Self::NoMultiLevelWildcardAllowedInTemplateTopic => {
                "No_Multi_Level_Wildcard_Allowed_In_TemplateTopic"
            }
            Self::TemplateTopicMustMatchTheSubscriptionTopic => {
                "TemplateTopic_Must_Match_The_SubscriptionTopic"
            }
            Self::OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed => {
                "Only_One_Substitution_Defining_Device_Identifier_Can_Be_Used"
            }
            Self::OneSubstitutionDefiningDeviceIdentifierMustBeUsed => {
                "One_Substitution_Defining_Device_Identifier_Must_Be_Used"
            }
            Self::SubstitutionPathMalformed => "Substitution_Path_Malformed",
            Self::GenericDeviceIdentifierInvalid => "Generic_Device_Identifier_Invalid",
            Self::PublishTopicMustNotBeEmpty => "PublishTopic_Must_Not_Be_Empty",
            Self::FilterOutboundMustNotBeEmpty => "FilterOutbound_Must_Not_Be_Empty",
            Self::SourceTemplateInvalidJson => "Source_Template_Invalid_JSON",
            Self::TargetTemplateInvalidJson => "Target_Template_Invalid_JSON",
            Self::QosOutOfRange => "Qos_Out_Of_Range",
            Self::ExtensionNameMissing => "Extension_Name_Missing",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for ValidationError {}

impl Mapping {
    /// Collect every validation error of this mapping
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut result = Vec::new();

        if self.id.trim().is_empty() {
            result.push(ValidationError::IdMustNotBeEmpty);
        }
        if self.qos > 2 {
            result.push(ValidationError::QosOutOfRange);
        }

        result.extend(self.validate_substitutions());

        if self.is_inbound() {
            result.extend(validate_subscription_topic(&self.subscription_topic));
            result.extend(validate_template_topic(&self.template_topic));
            if !template_matches_subscription(&self.subscription_topic, &self.template_topic) {
                result.push(ValidationError::TemplateTopicMustMatchTheSubscriptionTopic);
            }
            // The identifier is written into an object field of every document
            let identifier = JsonPath::parse(&self.generic_device_identifier);
            if identifier.map_or(true, |path| path.is_root() || path.has_wildcard()) {
                result.push(ValidationError::GenericDeviceIdentifierInvalid);
            }
        } else {
            if self.publish_topic.trim().is_empty() {
                result.push(ValidationError::PublishTopicMustNotBeEmpty);
            }
            if self.filter_outbound.trim().is_empty() {
                result.push(ValidationError::FilterOutboundMustNotBeEmpty);
            }
        }

        if serde_json::from_str::<serde_json::Value>(&self.source_template).is_err() {
            result.push(ValidationError::SourceTemplateInvalidJson);
        }
        if serde_json::from_str::<serde_json::Value>(&self.target_template).is_err() {
            result.push(ValidationError::TargetTemplateInvalidJson);
        }

        if self.mapping_type == MappingType::ProcessorExtension
            && self.extension_name.as_deref().map_or(true, str::is_empty)
        {
            result.push(ValidationError::ExtensionNameMissing);
        }

        result
    }

    fn validate_substitutions(&self) -> Vec<ValidationError> {
        let mut result = Vec::new();

        let malformed = self.substitutions.iter().any(|s| {
            JsonPath::parse(&s.path_source).is_err() || JsonPath::parse(&s.path_target).is_err()
        });
        if malformed {
            result.push(ValidationError::SubstitutionPathMalformed);
        }

        // Extensions produce their own identifier, outbound mappings have none
        if !self.is_inbound() || self.mapping_type == MappingType::ProcessorExtension {
            return result;
        }

        let identifiers = self
            .substitutions
            .iter()
            .filter(|s| s.defines_identifier)
            .count();
        if identifiers > 1 {
            result.push(ValidationError::OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed);
        }
        if identifiers < 1 {
            result.push(ValidationError::OneSubstitutionDefiningDeviceIdentifierMustBeUsed);
        }

        result
    }
}
