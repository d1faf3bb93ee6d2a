//! Resource scanning
//!
//! Fan-out over resource descriptors on top of the dispatch engine.

pub mod orchestrator;

pub use orchestrator::{DescriptorOutcome, ResourceDescriptor, ScanOrchestrator, ScanResult};
