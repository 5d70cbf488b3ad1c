//! Substitution rules
//!
//! A mapping's substitutions copy values from a source document into a
//! target template. Paths use a small dotted language:
//!
//! - `a.b.c`: nested keys
//! - `values[2]`: array index
//! - `values[*]`: every element, producing multiple values
//! - `$`: the whole document
//! - `_TOPIC_LEVEL_[1]`: second level of the message topic
//!
//! When rules produce different numbers of values, the engine fans the
//! message out to the largest count and shorter rules repeat their last value.

mod engine;
mod path;
mod value;

pub use engine::{
    apply_to_document, extract, needs_repair, reconcile, Extraction, FanOutPlan, ProcessingType,
};
pub use path::{JsonPath, PathError, Selection};
pub use value::{PathValue, ValueType};
