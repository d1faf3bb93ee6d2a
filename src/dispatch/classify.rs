//! Outcome classification
//!
//! Maps a raw response or a transport failure to the [`Classification`]
//! that drives retry decisions.

use crate::dispatch::transport::RawResponse;
use crate::error::{Classification, TransportError};
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use std::time::Duration;

/// Classify a completed exchange by its status code
pub fn classify_response(response: &RawResponse) -> Classification {
    match response.status {
        200..=299 => Classification::Success,
        429 => Classification::RateLimited {
            retry_after: response
                .headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
        },
        500..=599 => Classification::ServerError(response.status),
        status => Classification::ClientError(status),
    }
}

/// Classify an exchange that produced no response
pub fn classify_transport_error(err: &TransportError) -> Classification {
    match err {
        TransportError::Timeout
        | TransportError::Connect(_)
        | TransportError::Network(_) => Classification::TransientNetwork(err.to_string()),
        TransportError::InvalidRequest(_) | TransportError::Setup(_) => {
            Classification::ClientError(0)
        }
    }
}

/// Parse a Retry-After value
///
/// Accepts delta-seconds (`"120"`) or an HTTP date; a date in the past
/// yields a zero delay.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
