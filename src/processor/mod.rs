//! Message Processing Pipeline
//!
//! Inbound messages run through a fixed sequence of stages for every
//! mapping resolved for their topic:
//!
//! 1. deserialize the payload according to the mapping type
//! 2. inject topic levels as `_TOPIC_LEVEL_`
//! 3. extract values with the mapping's substitutions, or an extension
//! 4. resolve device identities
//! 5. reconcile cardinalities into a fan-out plan
//! 6. draft one target document per planned document
//! 7. dispatch the drafted requests to the platform
//!
//! Every stage reads and writes a [`ProcessingContext`]. Failures are
//! recorded on the context; a failing mapping or document does not stop
//! its siblings.

mod context;
mod deserializer;
mod dispatcher;
mod error;
mod extension;
mod inbound;
mod outbound;
mod pipeline;
mod status;


pub use context::{ProcessingContext, TargetRequest};
pub use deserializer::{
    FlatFileDeserializer, HexDeserializer, JsonDeserializer, PayloadDeserializer, MESSAGE_KEY,
};
pub use dispatcher::{CancellationFlag, Dispatcher};
pub use error::{ProcessingError, Result};
pub use extension::{ExtensionRegistry, PayloadExtractor};
pub use inbound::{InboundProcessor, TOPIC_LEVEL};
pub use outbound::OutboundProcessor;
pub use pipeline::Pipeline;
pub use status::{MappingStatus, StatusRegistry};
