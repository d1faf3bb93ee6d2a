//! resource-scanner - A rate-limited, retrying client for paginated resource APIs
//!
//! This crate discovers and fetches resources from an HTTP API while
//! respecting the server's request quota and recovering from transient
//! failures. The request-dispatch engine lives in [`dispatch`]; [`scan`]
//! fans out over resource collections and [`scanner`] is the facade used
//! by the binary.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod scan;
pub mod scanner;
pub mod telemetry;

pub use scanner::ResourceScanner;
