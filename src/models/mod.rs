//! Domain models for resource-scanner
//!
//! Typed payloads of the resource API.

pub mod resource;

// Re-export commonly used types
pub use resource::{HealthStatus, Resource, ResourceMetadata, ResourcePage};
