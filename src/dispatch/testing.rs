//! Test transports shared by the dispatch and scan unit tests

use crate::dispatch::ratelimit::Admission;
use crate::dispatch::transport::{RawResponse, RequestSpec, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Transport answering each call with a closure of (1-based call number, request)
pub(crate) struct FnTransport<F> {
    respond: F,
    delay: Duration,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<F> FnTransport<F>
where
    F: Fn(u32, &RequestSpec) -> Result<RawResponse, TransportError> + Send + Sync,
{
    pub(crate) fn new(respond: F) -> Self {
        Self {
            respond,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Simulated latency of every exchange
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> Transport for FnTransport<F>
where
    F: Fn(u32, &RequestSpec) -> Result<RawResponse, TransportError> + Send + Sync,
{
    fn validate(&self, request: &RequestSpec) -> Result<(), TransportError> {
        if request.path.starts_with('/') {
            Ok(())
        } else {
            Err(TransportError::InvalidRequest(request.path.clone()))
        }
    }

    async fn send(
        &self,
        _admission: Admission,
        request: &RequestSpec,
    ) -> Result<RawResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(call, request)
    }
}

/// JSON response with the given status
pub(crate) fn json_response(status: u16, body: serde_json::Value) -> RawResponse {
    RawResponse::new(status, body.to_string()).with_header("content-type", "application/json")
}
