//! Processing error types.

use std::fmt;

use crate::mapping::MappingType;
use crate::platform::PlatformError;
use crate::substitution::{PathError, ValueType};

/// Errors recorded on a processing context or one of its documents
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// Raw payload could not be turned into a document
    Deserialize(String),
    /// No deserializer for the mapping's payload format
    UnsupportedFormat(MappingType),
    /// Extension missing or failed
    Extension(String),
    /// Path expression is malformed
    Path(PathError),
    /// Target path does not exist in the template
    PathNotFound(String),
    /// Value does not have the declared type
    TypeMismatch {
        target: String,
        expected: ValueType,
        found: ValueType,
    },
    /// Required value is missing
    MissingValue(String),
    /// Device identity could not be resolved
    Identity(String),
    /// Platform rejected or failed the request
    Platform(PlatformError),
    /// Publishing to the broker failed
    Publish(String),
    /// Dispatch was cancelled before the platform call
    Cancelled,
}

impl ProcessingError {
    /// Errors that only affect a single target document
    pub fn is_document_level(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound(_) | Self::TypeMismatch { .. } | Self::MissingValue(_)
        )
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deserialize(e) => write!(f, "deserialization error: {}", e),
            Self::UnsupportedFormat(t) => write!(f, "unsupported payload format: {:?}", t),
            Self::Extension(e) => write!(f, "extension error: {}", e),
            Self::Path(e) => write!(f, "path error: {}", e),
            Self::PathNotFound(p) => write!(f, "Path not found: {}", p),
            Self::TypeMismatch {
                target,
                expected,
                found,
            } => write!(
                f,
                "type mismatch for '{}': expected {}, found {}",
                target, expected, found
            ),
            Self::MissingValue(p) => write!(f, "missing value for '{}'", p),
            Self::Identity(e) => write!(f, "identity error: {}", e),
            Self::Platform(e) => write!(f, "platform error: {}", e),
            Self::Publish(e) => write!(f, "publish error: {}", e),
            Self::Cancelled => write!(f, "dispatch cancelled"),
        }
    }
}

impl std::error::Error for ProcessingError {}

impl From<PathError> for ProcessingError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::NotFound(path) => Self::PathNotFound(path),
            other => Self::Path(other),
        }
    }
}

impl From<PlatformError> for ProcessingError {
    fn from(err: PlatformError) -> Self {
        Self::Platform(err)
    }
}

/// Result type for processing operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;
