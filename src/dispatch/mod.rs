//! Request dispatch engine
//!
//! Every outgoing call flows through the same pipeline:
//!
//! 1. [`RateLimiter`] grants an [`Admission`] (sliding window, shared)
//! 2. [`Transport`] performs one exchange, consuming the admission
//! 3. [`classify`] maps the outcome to a [`Classification`](crate::error::Classification)
//! 4. [`RetryPolicy`] decides whether and when to try again
//!
//! [`RequestExecutor`] drives that loop for one logical call and
//! [`Paginator`] chains calls over a paginated collection.

pub mod classify;
pub mod executor;
pub mod paginator;
pub mod ratelimit;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::{AttemptOutcome, RequestAttempt, RequestExecutor};
pub use paginator::{Page, Pagination, Paginator};
pub use ratelimit::{Admission, RateLimiter};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, RawResponse, RequestSpec, Transport};
