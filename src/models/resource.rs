//! Resource API models
//!
//! Typed views of the payloads served by the resource API. Fields the
//! scanner does not interpret are kept in `extra` so nothing is lost when
//! a resource is re-serialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A cloud resource as returned by `/resources`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identifier, e.g. `res_42`
    pub id: String,

    /// Resource type (storage, compute, network, database, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Display name
    pub name: String,

    /// Resource metadata
    #[serde(default)]
    pub metadata: ResourceMetadata,

    /// Whether the resource holds sensitive data
    #[serde(default)]
    pub sensitive_data: bool,
}

/// Metadata attached to a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Region the resource lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Creation date as reported by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Any other metadata fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of the `/resources` listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePage {
    /// Resources on this page
    pub resources: Vec<Resource>,

    /// 1-based page number
    pub page: u32,

    /// Total number of pages at the requested page size
    pub total_pages: u32,

    /// Total number of resources
    pub total_items: u64,
}

impl ResourcePage {
    /// Check if this is the last page
    pub fn is_last(&self) -> bool {
        self.page >= self.total_pages
    }
}

/// Body of `/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Reported status
    pub status: String,
}

impl HealthStatus {
    /// The service reports itself healthy
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
