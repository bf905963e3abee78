//! # Resilience Primitives Module
//!
//! Failure-isolation wrappers placed in front of every provider call. Each
//! instance is scoped to one named resource, so one provider's failures never
//! throttle another's traffic.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Token bucket with a FIFO wait queue and per-entry timeout |
//! | [`circuit_breaker`] | Closed / open / half-open failure isolation |
//! | [`retry`] | Full-jitter exponential backoff for transient errors |
//!
//! Calls flow `RateLimiter::acquire` → `CircuitBreaker::is_allowed` →
//! `BackoffRetrier::run`. Only a breaker rejection or a queue timeout can stop a
//! request before it reaches the network.
//!
//! ```rust
//! use llm_relay::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(5)
//!     .with_reset_timeout(Duration::from_secs(30));
//! let breaker = CircuitBreaker::new("mistral", config);
//!
//! if breaker.allow_request() {
//!     // Make API call...
//!     breaker.record_success();
//! }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState, FailurePolicy,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot, RefillStrategy};
pub use retry::{with_retry, BackoffRetrier, RetryPolicy};
