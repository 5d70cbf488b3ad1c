//! Compiled-in payload extensions
//!
//! Mappings of type `PROCESSOR_EXTENSION` hand the raw payload to a named
//! extractor instead of evaluating their substitution paths.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ProcessingContext;
use super::error::ProcessingError;
use crate::substitution::Extraction;

/// Custom extraction of target values from a raw payload
pub trait PayloadExtractor: Send + Sync {
    fn extract_from_source(
        &self,
        ctx: &mut ProcessingContext,
    ) -> Result<Extraction, ProcessingError>;
}

impl<F> PayloadExtractor for F
where
    F: Fn(&mut ProcessingContext) -> Result<Extraction, ProcessingError> + Send + Sync,
{
    fn extract_from_source(
        &self,
        ctx: &mut ProcessingContext,
    ) -> Result<Extraction, ProcessingError> {
        self(ctx)
    }
}

/// Named extractors available to extension mappings
#[derive(Default)]
pub struct ExtensionRegistry {
    extractors: RwLock<HashMap<String, Arc<dyn PayloadExtractor>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extractor, replacing any previous one with the same name
    pub fn register(&self, name: impl Into<String>, extractor: Arc<dyn PayloadExtractor>) {
        self.extractors.write().insert(name.into(), extractor);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.extractors.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PayloadExtractor>> {
        self.extractors.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extractors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the extractor a context's mapping names
    pub fn extract(&self, ctx: &mut ProcessingContext) -> Result<Extraction, ProcessingError> {
        let name = ctx
            .mapping
            .extension_name
            .clone()
            .ok_or_else(|| ProcessingError::Extension("mapping names no extension".to_string()))?;

        let extractor = self
            .get(&name)
            .ok_or_else(|| ProcessingError::Extension(format!("extension '{}' not registered", name)))?;

        extractor.extract_from_source(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Mapping, MappingType, RepairStrategy};
    use crate::substitution::PathValue;
    use bytes::Bytes;
    use serde_json::json;

    fn extension_context(name: &str, payload: &'static [u8]) -> ProcessingContext {
        let mut mapping = Mapping::inbound("ext", "/bin/+");
        mapping.mapping_type = MappingType::ProcessorExtension;
        mapping.extension_name = Some(name.to_string());
        ProcessingContext::new(Arc::new(mapping), "/bin/x", Bytes::from_static(payload), 1)
    }

    #[test]
    fn test_registered_extractor_runs() {
        let registry = ExtensionRegistry::new();
        registry.register(
            "length",
            Arc::new(|ctx: &mut ProcessingContext| {
                let mut extraction = Extraction::new();
                extraction.push(
                    "c8y_Length.L.value",
                    PathValue::new(json!(ctx.payload.len()), RepairStrategy::Default),
                );
                Ok(extraction)
            }),
        );

        let mut ctx = extension_context("length", b"abcd");
        let extraction = registry.extract(&mut ctx).unwrap();
        assert_eq!(
            extraction.values("c8y_Length.L.value").unwrap()[0].value,
            json!(4)
        );
        assert_eq!(registry.names(), vec!["length".to_string()]);
    }

    #[test]
    fn test_unknown_extension() {
        let registry = ExtensionRegistry::new();
        let mut ctx = extension_context("missing", b"");
        assert!(matches!(
            registry.extract(&mut ctx),
            Err(ProcessingError::Extension(_))
        ));
    }
}
