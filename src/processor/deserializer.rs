//! Payload deserializers
//!
//! Each payload format turns raw bytes into a JSON document that
//! substitution paths can address. Non-JSON formats wrap their content
//! under a `message` key.

use serde_json::{json, Value};

use super::error::ProcessingError;
use crate::mapping::MappingType;

/// Key under which wrapped payloads are placed
pub const MESSAGE_KEY: &str = "message";

/// Turns raw payload bytes into a document
pub trait PayloadDeserializer: Send + Sync {
    fn deserialize(&self, raw: &[u8]) -> Result<Value, ProcessingError>;
}

/// Payload is a JSON document
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDeserializer;

impl PayloadDeserializer for JsonDeserializer {
    fn deserialize(&self, raw: &[u8]) -> Result<Value, ProcessingError> {
        serde_json::from_slice(raw).map_err(|e| ProcessingError::Deserialize(e.to_string()))
    }
}

/// Payload is UTF-8 text, e.g. a CSV line
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatFileDeserializer;

impl PayloadDeserializer for FlatFileDeserializer {
    fn deserialize(&self, raw: &[u8]) -> Result<Value, ProcessingError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ProcessingError::Deserialize(format!("invalid UTF-8: {}", e)))?;
        Ok(json!({ MESSAGE_KEY: text }))
    }
}

/// Payload is binary, exposed as a lowercase hex string
#[derive(Debug, Default, Clone, Copy)]
pub struct HexDeserializer;

impl PayloadDeserializer for HexDeserializer {
    fn deserialize(&self, raw: &[u8]) -> Result<Value, ProcessingError> {
        Ok(json!({ MESSAGE_KEY: hex::encode(raw) }))
    }
}

/// Built-in deserializer for a payload format.
/// Extension mappings have none; their extractor reads the raw payload.
pub fn for_type(mapping_type: MappingType) -> Option<&'static dyn PayloadDeserializer> {
    match mapping_type {
        MappingType::Json => Some(&JsonDeserializer),
        MappingType::FlatFile => Some(&FlatFileDeserializer),
        MappingType::Hex | MappingType::GenericBinary => Some(&HexDeserializer),
        MappingType::ProcessorExtension => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json() {
        let doc = JsonDeserializer.deserialize(br#"{"a":[1,2]}"#).unwrap();
        assert_eq!(doc, json!({"a": [1, 2]}));
        assert!(matches!(
            JsonDeserializer.deserialize(b"{oops"),
            Err(ProcessingError::Deserialize(_))
        ));
    }

    #[test]
    fn test_flat_file() {
        let doc = FlatFileDeserializer.deserialize(b"100,temp,21.5").unwrap();
        assert_eq!(doc, json!({"message": "100,temp,21.5"}));
        assert!(FlatFileDeserializer.deserialize(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_hex() {
        let doc = HexDeserializer.deserialize(&[0x0a, 0xff, 0x10]).unwrap();
        assert_eq!(doc, json!({"message": "0aff10"}));
    }

    #[test]
    fn test_for_type() {
        assert!(for_type(MappingType::GenericBinary).is_some());
        assert!(for_type(MappingType::ProcessorExtension).is_none());
    }
}
