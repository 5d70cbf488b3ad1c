//! Platform Collaborator
//!
//! The cloud platform that receives drafted requests and owns device
//! identities. The real platform SDK lives outside this crate; the
//! implementations here are an in-memory recorder for tests and a
//! logging client for the binary.

mod logging;
mod memory;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::processor::TargetRequest;

pub use logging::LoggingPlatform;
pub use memory::MemoryPlatform;

/// Error type for platform operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Platform rejected the request
    Rejected { status: u16, message: String },
    /// Referenced object does not exist
    NotFound(String),
    /// Platform could not be reached
    Unavailable(String),
    /// Other error
    Other(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Rejected { status, message } => {
                write!(f, "Rejected ({}): {}", status, message)
            }
            PlatformError::NotFound(what) => write!(f, "Not found: {}", what),
            PlatformError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            PlatformError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Cloud platform client
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Create or update the object described by a drafted request.
    /// Returns the platform's representation of the stored object.
    async fn create_or_update(&self, request: &TargetRequest) -> Result<Value, PlatformError>;

    /// Look up the internal id registered for an external id
    async fn resolve_external_id(
        &self,
        external_id_type: &str,
        external_id: &str,
    ) -> Result<Option<String>, PlatformError>;

    /// Register a new device under an external id, returning its internal id
    async fn create_device(
        &self,
        external_id_type: &str,
        external_id: &str,
        name: &str,
    ) -> Result<String, PlatformError>;
}

/// Device identity lookups needed while drafting requests
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_external_id(
        &self,
        external_id_type: &str,
        external_id: &str,
    ) -> Result<Option<String>, PlatformError>;

    async fn create_device(
        &self,
        external_id_type: &str,
        external_id: &str,
        name: &str,
    ) -> Result<String, PlatformError>;
}

#[async_trait]
impl<T: PlatformClient + ?Sized> IdentityResolver for T {
    async fn resolve_external_id(
        &self,
        external_id_type: &str,
        external_id: &str,
    ) -> Result<Option<String>, PlatformError> {
        PlatformClient::resolve_external_id(self, external_id_type, external_id).await
    }

    async fn create_device(
        &self,
        external_id_type: &str,
        external_id: &str,
        name: &str,
    ) -> Result<String, PlatformError> {
        PlatformClient::create_device(self, external_id_type, external_id, name).await
    }
}
