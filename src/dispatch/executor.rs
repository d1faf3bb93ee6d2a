//! Request executor
//!
//! The executor runs one logical call as an explicit state machine:
//!
//! ```text
//! Idle -> Admitted -> InFlight -> Succeeded
//!            ^                 -> Failed
//!            |                 -> RetryScheduled --(delay, admission)--+
//!            +---------------------------------------------------------+
//! ```
//!
//! `Admitted` owns the [`Admission`] that the exchange consumes, so the
//! transport cannot be reached without a preceding grant. An admitted
//! exchange always runs, bounded by the request timeout; cancellation is
//! observed before admission and during backoff. Retry decisions are made
//! here and nowhere else.

use crate::dispatch::classify::{classify_response, classify_transport_error};
use crate::dispatch::ratelimit::{Admission, RateLimiter};
use crate::dispatch::retry::RetryPolicy;
use crate::dispatch::transport::{RawResponse, RequestSpec, Transport};
use crate::error::{Classification, ExecError, RetryableError, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default per-exchange timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Exchange not yet classified
    Pending,
    /// Exchange succeeded
    Success,
    /// Exchange failed with the given classification
    Failed(Classification),
}

/// Record of one try inside a logical call
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    target: String,
    attempt: u32,
    started_at: Instant,
    outcome: AttemptOutcome,
}

impl RequestAttempt {
    fn start(request: &RequestSpec, attempt: u32) -> Self {
        Self {
            target: request.to_string(),
            attempt,
            started_at: Instant::now(),
            outcome: AttemptOutcome::Pending,
        }
    }

    fn record(self, classification: &Classification) -> Self {
        let outcome = match classification {
            Classification::Success => AttemptOutcome::Success,
            other => AttemptOutcome::Failed(other.clone()),
        };
        let attempt = Self { outcome, ..self };
        debug!(
            target_request = %attempt.target,
            attempt = attempt.attempt,
            elapsed_ms = attempt.started_at.elapsed().as_millis() as u64,
            outcome = ?attempt.outcome,
            "Attempt finished"
        );
        attempt
    }

    /// Method, path and query of the request
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Instant the exchange started
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Recorded outcome
    pub fn outcome(&self) -> &AttemptOutcome {
        &self.outcome
    }
}

/// Per-call retry bookkeeping; owned by exactly one `execute` call
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    next_delay: Option<Duration>,
    last_classification: Option<Classification>,
    total_delay: Duration,
}

#[derive(Debug)]
enum ExecState {
    Idle,
    Admitted(Admission),
    InFlight(RequestAttempt, Result<RawResponse, TransportError>),
    RetryScheduled(Duration),
    Succeeded(RawResponse),
    Failed(ExecError),
}

/// Executes logical calls against the transport under the rate limit and
/// retry policy
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl RequestExecutor {
    /// Create an executor
    pub fn new(transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiter,
            policy,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the per-exchange timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Rate limiter shared by every call of this executor
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a call until success or a terminal failure
    pub async fn execute(&self, request: &RequestSpec) -> Result<RawResponse, ExecError> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Execute a call that ends early with [`ExecError::Cancelled`] once
    /// `cancel` fires
    ///
    /// Cancellation abandons a pending admission wait or backoff delay, and
    /// consumes no rate-limit slot. An exchange that already holds its
    /// admission completes first; a successful response is still returned.
    pub async fn execute_with_cancel(
        &self,
        request: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, ExecError> {
        if let Err(err) = self.transport.validate(request) {
            warn!(request = %request, error = %err, "Request refused before admission");
            return Err(ExecError::NotAdmitted(err.to_string()));
        }

        let mut retry = RetryState::default();
        let mut state = ExecState::Idle;

        loop {
            state = match state {
                ExecState::Idle => self.await_admission(cancel, &retry).await,
                ExecState::Admitted(admission) => {
                    retry.attempt += 1;
                    let attempt = RequestAttempt::start(request, retry.attempt);
                    let outcome = self.exchange(admission, request).await;
                    ExecState::InFlight(attempt, outcome)
                }
                ExecState::InFlight(attempt, outcome) => {
                    let (classification, response) = match outcome {
                        Ok(response) => (classify_response(&response), Some(response)),
                        Err(err) => (classify_transport_error(&err), None),
                    };
                    attempt.record(&classification);

                    match (classification, response) {
                        (Classification::Success, Some(response)) => {
                            ExecState::Succeeded(response)
                        }
                        (classification, _) => {
                            self.schedule_retry(request, classification, &mut retry)
                        }
                    }
                }
                ExecState::RetryScheduled(delay) => {
                    debug!(
                        request = %request,
                        next_delay = ?retry.next_delay,
                        total_delay_ms = retry.total_delay.as_millis() as u64,
                        "Backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => ExecState::Failed(ExecError::Cancelled {
                            attempts: retry.attempt,
                        }),
                        _ = tokio::time::sleep(delay) => {
                            retry.next_delay = None;
                            self.await_admission(cancel, &retry).await
                        }
                    }
                }
                ExecState::Succeeded(response) => return Ok(response),
                ExecState::Failed(err) => return Err(err),
            };
        }
    }

    async fn await_admission(&self, cancel: &CancellationToken, retry: &RetryState) -> ExecState {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => ExecState::Failed(ExecError::Cancelled {
                attempts: retry.attempt,
            }),
            admission = self.limiter.admit() => ExecState::Admitted(admission),
        }
    }

    async fn exchange(
        &self,
        admission: Admission,
        request: &RequestSpec,
    ) -> Result<RawResponse, TransportError> {
        tokio::time::timeout(self.request_timeout, self.transport.send(admission, request))
            .await
            .unwrap_or(Err(TransportError::Timeout))
    }

    fn schedule_retry(
        &self,
        request: &RequestSpec,
        classification: Classification,
        retry: &mut RetryState,
    ) -> ExecState {
        let attempts = retry.attempt;

        match self.policy.should_retry(&classification, attempts) {
            Some(delay)
                if self
                    .policy
                    .allows_total_delay(retry.total_delay.saturating_add(delay)) =>
            {
                warn!(
                    request = %request,
                    attempt = attempts,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    classification = %classification,
                    "Retrying request"
                );
                retry.total_delay = retry.total_delay.saturating_add(delay);
                retry.next_delay = Some(delay);
                retry.last_classification = Some(classification);
                ExecState::RetryScheduled(delay)
            }
            _ if !classification.is_retryable() => {
                warn!(
                    request = %request,
                    attempts = attempts,
                    classification = %classification,
                    "Request rejected"
                );
                ExecState::Failed(ExecError::Rejected {
                    classification,
                    attempts,
                })
            }
            _ => {
                warn!(
                    request = %request,
                    attempts = attempts,
                    total_delay_ms = retry.total_delay.as_millis() as u64,
                    previous = ?retry.last_classification,
                    classification = %classification,
                    "Max retries exhausted"
                );
                ExecState::Failed(ExecError::Exhausted {
                    classification,
                    attempts,
                })
            }
        }
    }
}
