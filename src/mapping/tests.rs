//! Mapping module tests

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;

fn measurement(id: &str, subscription: &str, template: &str) -> Mapping {
    let mut mapping = Mapping::inbound(id, subscription);
    mapping.template_topic = template.to_string();
    mapping.target_template = r#"{"source":{"id":""},"c8y_Temperature":{"T":{"value":0}}}"#.to_string();
    mapping.substitutions = vec![
        Substitution::new("_TOPIC_LEVEL_[1]", "source.id").identifier(),
        Substitution::new("value", "c8y_Temperature.T.value"),
    ];
    mapping
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_template_must_match_subscription() {
    let mapping = measurement("m", "/device/#", "/device");
    assert_eq!(
        mapping.validate(),
        vec![ValidationError::TemplateTopicMustMatchTheSubscriptionTopic]
    );
    assert_eq!(
        ValidationError::TemplateTopicMustMatchTheSubscriptionTopic.to_string(),
        "TemplateTopic_Must_Match_The_SubscriptionTopic"
    );

    let mapping = measurement("m", "/device/#", "/device/east/");
    assert!(mapping.validate().is_empty());
}

#[test]
fn test_identifier_rule_count() {
    let mut mapping = measurement("m", "/device/+", "/device/d1");
    mapping.substitutions.push(Substitution::new("serial", "source.id").identifier());
    assert!(mapping
        .validate()
        .contains(&ValidationError::OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed));

    mapping.substitutions.retain(|s| !s.defines_identifier);
    assert!(mapping
        .validate()
        .contains(&ValidationError::OneSubstitutionDefiningDeviceIdentifierMustBeUsed));

    // Extensions provide their own identity
    mapping.mapping_type = MappingType::ProcessorExtension;
    mapping.extension_name = Some("custom".to_string());
    assert!(mapping.validate().is_empty());
}

#[test]
fn test_malformed_paths_and_templates() {
    let mut mapping = measurement("m", "/device/+", "/device/d1");
    mapping.substitutions.push(Substitution::new("values[", "x"));
    mapping.target_template = "{not json".to_string();
    mapping.qos = 3;

    let errors = mapping.validate();
    assert!(errors.contains(&ValidationError::SubstitutionPathMalformed));
    assert!(errors.contains(&ValidationError::TargetTemplateInvalidJson));
    assert!(errors.contains(&ValidationError::QosOutOfRange));
}

#[test]
fn test_generic_device_identifier_must_name_a_field() {
    let mut mapping = measurement("m", "/device/+", "/device/d1");
    for identifier in ["$", "", "source[*].id", "source.["] {
        mapping.generic_device_identifier = identifier.to_string();
        assert_eq!(
            mapping.validate(),
            vec![ValidationError::GenericDeviceIdentifierInvalid],
            "identifier {:?}",
            identifier
        );
    }

    mapping.generic_device_identifier = "device.serial".to_string();
    assert!(mapping.validate().is_empty());
    assert_eq!(
        ValidationError::GenericDeviceIdentifierInvalid.code(),
        "Generic_Device_Identifier_Invalid"
    );
}

#[test]
fn test_outbound_validation() {
    let mapping = Mapping::outbound("o", Api::Measurement, "", "");
    let errors = mapping.validate();
    assert!(errors.contains(&ValidationError::PublishTopicMustNotBeEmpty));
    assert!(errors.contains(&ValidationError::FilterOutboundMustNotBeEmpty));
    assert!(!errors.contains(&ValidationError::OneSubstitutionDefiningDeviceIdentifierMustBeUsed));

    let mapping = Mapping::outbound("o", Api::Measurement, "c8y_Temperature", "/out/+/temp");
    assert!(mapping.validate().is_empty());
}

#[test]
fn test_extension_requires_name() {
    let mut mapping = measurement("m", "/bin/+", "/bin/x");
    mapping.mapping_type = MappingType::ProcessorExtension;
    assert_eq!(mapping.validate(), vec![ValidationError::ExtensionNameMissing]);
}

// =============================================================================
// Model Tests
// =============================================================================

#[test]
fn test_sort_puts_identifier_first() {
    let mut mapping = Mapping::inbound("m", "a/+");
    mapping.substitutions = vec![
        Substitution::new("a", "x"),
        Substitution::new("id", "source.id").identifier(),
        Substitution::new("c", "z"),
    ];
    mapping.sort_substitutions();

    let order: Vec<&str> = mapping
        .substitutions
        .iter()
        .map(|s| s.path_source.as_str())
        .collect();
    assert_eq!(order, vec!["id", "a", "c"]);
}

#[test]
fn test_deserialize_definition() {
    let definition = json!({
        "id": "m1",
        "subscriptionTopic": "/plant/+/temperature",
        "templateTopic": "/plant/hall1/temperature",
        "targetAPI": "EVENT",
        "mappingType": "FLAT_FILE",
        "target": "{\"source\":{\"id\":\"\"}}",
        "substitutions": [
            { "pathSource": "message", "pathTarget": "text", "repairStrategy": "CREATE_IF_MISSING" },
            { "pathSource": "_TOPIC_LEVEL_[1]", "pathTarget": "source.id", "definesDeviceIdentifier": true }
        ]
    });

    let mapping: Mapping = serde_json::from_value(definition).unwrap();
    assert_eq!(mapping.target_api, Api::Event);
    assert_eq!(mapping.mapping_type, MappingType::FlatFile);
    assert_eq!(mapping.qos, 1);
    assert!(mapping.active);
    assert_eq!(mapping.generic_device_identifier, "source.id");
    assert_eq!(
        mapping.substitutions[0].repair_strategy,
        RepairStrategy::CreateIfMissing
    );
    assert!(mapping.substitutions[1].defines_identifier);
}

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_store_upsert_sorts_and_indexes() {
    let store = MappingStore::new();
    let mut mapping = measurement("m1", "/plant//+/temperature/", "/plant/hall1/temperature");
    mapping.substitutions.reverse();

    let upserted = store.upsert(mapping).unwrap();
    assert!(upserted.previous.is_none());
    assert_eq!(upserted.mapping.subscription_topic, "/plant/+/temperature");
    assert!(upserted.mapping.substitutions[0].defines_identifier);

    let resolved = store.resolve_inbound("/plant/hall2/temperature");
    assert_eq!(resolved.len(), 1);
    assert!(Arc::ptr_eq(&resolved[0], &upserted.mapping));
}

#[test]
fn test_store_rejects_invalid() {
    let store = MappingStore::new();
    let result = store.upsert(measurement("m1", "/device/#", "/device"));
    assert_eq!(
        result.unwrap_err(),
        StoreError::Invalid(vec![
            ValidationError::TemplateTopicMustMatchTheSubscriptionTopic
        ])
    );
    assert!(store.is_empty());
    assert!(store.resolve_inbound("/device/x").is_empty());
}

#[test]
fn test_store_update_moves_topic() {
    let store = MappingStore::new();
    store.upsert(measurement("m1", "/a/+", "/a/x")).unwrap();

    let upserted = store.upsert(measurement("m1", "/b/+", "/b/x")).unwrap();
    assert_eq!(upserted.previous.unwrap().subscription_topic, "/a/+");
    assert!(store.resolve_inbound("/a/x").is_empty());
    assert_eq!(store.resolve_inbound("/b/x").len(), 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_store_inactive_not_resolved() {
    let store = MappingStore::new();
    let mut mapping = measurement("m1", "/a/+", "/a/x");
    mapping.active = false;
    store.upsert(mapping).unwrap();

    assert!(store.resolve_inbound("/a/x").is_empty());
    assert_eq!(store.inbound_mappings().len(), 1);
}

#[test]
fn test_store_delete() {
    let store = MappingStore::new();
    store.upsert(measurement("m1", "/a/+", "/a/x")).unwrap();

    assert!(store.delete("m1").is_some());
    assert!(store.delete("m1").is_none());
    assert!(store.resolve_inbound("/a/x").is_empty());
    assert!(store.get("m1").is_none());
}

#[test]
fn test_store_resolve_outbound() {
    let store = MappingStore::new();
    store
        .upsert(Mapping::outbound("temp", Api::Measurement, "c8y_Temperature", "/out/temp"))
        .unwrap();
    store
        .upsert(Mapping::outbound("alarm", Api::Alarm, "c8y_Temperature", "/out/alarm"))
        .unwrap();

    let event = json!({"source": {"id": "1"}, "c8y_Temperature": {"T": {"value": 3}}});
    let resolved = store.resolve_outbound(Api::Measurement, &event);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, "temp");

    let other = json!({"c8y_Humidity": {}});
    assert!(store.resolve_outbound(Api::Measurement, &other).is_empty());
}

#[test]
fn test_store_load_json() {
    let store = MappingStore::new();
    let content = serde_json::to_string(&vec![
        measurement("good", "/a/+", "/a/x"),
        measurement("bad", "/device/#", "/device"),
    ])
    .unwrap();

    let report = store.load_json(&content).unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, "bad");
    assert_eq!(store.all().len(), 1);

    assert!(store.load_json("not json").is_err());
}
