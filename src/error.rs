//! Error types for resource-scanner
//!
//! This module defines the failure taxonomy of the request-dispatch engine.
//! All error types use `thiserror` for ergonomic error handling.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Category assigned to a completed or failed attempt
///
/// The classification drives every retry decision made by the executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Classification {
    /// 2xx response
    #[error("Success")]
    Success,

    /// Timeout, connection refused or reset
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// HTTP 429 or equivalent quota rejection
    #[error("Rate limited by server")]
    RateLimited {
        /// Server-provided Retry-After hint
        retry_after: Option<Duration>,
    },

    /// 5xx response
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// 4xx response other than 429
    ///
    /// Status `0` marks a request rejected locally before it reached the server.
    #[error("Client error: HTTP {0}")]
    ClientError(u16),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for Classification {
    fn is_retryable(&self) -> bool {
        match self {
            Classification::TransientNetwork(_) => true,
            Classification::RateLimited { .. } => true,
            Classification::ServerError(_) => true,

            Classification::Success => false,
            Classification::ClientError(_) => false,
        }
    }
}

/// Errors raised by a transport while performing one exchange
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The exchange did not complete within its timeout
    #[error("Request timed out")]
    Timeout,

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Generic network error (reset, broken body stream, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The transport itself could not be constructed
    #[error("Transport setup failed: {0}")]
    Setup(String),
}

/// Terminal failure of one logical call through the executor
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecError {
    /// The request was refused before admission; no slot was consumed
    #[error("Request never admitted: {0}")]
    NotAdmitted(String),

    /// Non-retryable rejection (4xx other than 429)
    #[error("Request rejected after {attempts} attempt(s): {classification}")]
    Rejected {
        /// Classification of the last attempt
        classification: Classification,
        /// Total attempts performed
        attempts: u32,
    },

    /// Retry budget spent (attempt count or total delay)
    #[error("Retries exhausted after {attempts} attempt(s): {classification}")]
    Exhausted {
        /// Classification of the last attempt
        classification: Classification,
        /// Total attempts performed
        attempts: u32,
    },

    /// Caller-initiated cancellation
    #[error("Request cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts performed before cancellation
        attempts: u32,
    },
}

impl ExecError {
    /// Number of network exchanges performed before the call ended
    pub fn attempts(&self) -> u32 {
        match self {
            ExecError::NotAdmitted(_) => 0,
            ExecError::Rejected { attempts, .. }
            | ExecError::Exhausted { attempts, .. }
            | ExecError::Cancelled { attempts } => *attempts,
        }
    }

    /// Classification of the last attempt, if any attempt completed
    pub fn classification(&self) -> Option<&Classification> {
        match self {
            ExecError::Rejected { classification, .. }
            | ExecError::Exhausted { classification, .. } => Some(classification),
            ExecError::NotAdmitted(_) | ExecError::Cancelled { .. } => None,
        }
    }

    /// Returns true if the caller cancelled the call
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled { .. })
    }
}

/// Errors terminating a paginated sequence
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PageError {
    /// The request for a page failed
    #[error("Page request failed: {0}")]
    Exec(#[from] ExecError),

    /// The page body could not be decoded
    #[error("Invalid page: {0}")]
    Decode(String),
}

impl PageError {
    /// Returns true if the sequence ended because the caller cancelled it
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PageError::Exec(err) if err.is_cancelled())
    }
}

/// Application-level error type for the scanner facade
#[derive(Debug, Error)]
pub enum ScanError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport construction error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Request failed
    #[error("Request failed: {0}")]
    Exec(#[from] ExecError),

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),
}
