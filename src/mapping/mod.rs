//! Mapping definitions, validation and the shared mapping store
//!
//! # Example Definition
//!
//! ```json
//! {
//!   "id": "temperature",
//!   "subscriptionTopic": "/plant/+/temperature",
//!   "templateTopic": "/plant/hall1/temperature",
//!   "targetAPI": "MEASUREMENT",
//!   "target": "{\"type\":\"c8y_Temperature\",\"source\":{\"id\":\"\"},\"c8y_Temperature\":{\"T\":{\"value\":0}}}",
//!   "substitutions": [
//!     { "pathSource": "_TOPIC_LEVEL_[1]", "pathTarget": "source.id", "definesIdentifier": true },
//!     { "pathSource": "value", "pathTarget": "c8y_Temperature.T.value" }
//!   ]
//! }
//! ```

mod model;
mod store;
mod validation;

#[cfg(test)]
mod tests;

pub use model::{Api, Direction, Mapping, MappingType, RepairStrategy, Substitution};
pub use store::{LoadReport, MappingStore, StoreError, Upserted};
pub use validation::ValidationError;
