//! Error classes shared by every resilience component.
//!
//! Each [`crate::Error`] maps onto exactly one [`ErrorClass`]. The class decides
//! whether the backoff retrier may try again and whether the circuit breaker
//! should count the failure against the resource's health.
//!
//! | Class                 | Retryable | Affects circuit |
//! |-----------------------|-----------|-----------------|
//! | `transient_network`   | yes       | yes             |
//! | `rate_limited`        | yes       | yes             |
//! | `authentication`      | no        | no              |
//! | `payload_too_large`   | no        | no              |
//! | `validation`          | no        | no              |
//! | `http_error`          | no        | 5xx only        |
//! | `breaker_open`        | no        | no              |
//! | `stream_repair`       | no        | no              |
//! | `configuration`       | no        | no              |
//! | `internal`            | no        | no              |
//!
//! ## Example
//!
//! ```rust
//! use llm_relay::error_code::ErrorClass;
//!
//! let class = ErrorClass::from_http_status(429);
//! assert_eq!(class.name(), "rate_limited");
//! assert!(class.retryable());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Connection reset, refused, or timed out before a response arrived.
    TransientNetwork,
    /// HTTP 429 or an explicit provider rate-limit signal.
    RateLimited,
    /// HTTP 401/403: missing, invalid, or expired credentials.
    Authentication,
    /// HTTP 413: request body exceeds the provider's limit.
    PayloadTooLarge,
    /// HTTP 400/422 or a locally rejected request.
    Validation,
    /// Any other non-success HTTP status.
    HttpError,
    /// Rejected by an open circuit breaker without touching the network.
    BreakerOpen,
    /// A stream frame could not be repaired into JSON.
    StreamRepair,
    /// Unsupported provider, missing credential, or invalid settings.
    Configuration,
    /// Local failure that says nothing about the remote resource.
    Internal,
}

impl ErrorClass {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::Authentication => "authentication",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Validation => "validation",
            Self::HttpError => "http_error",
            Self::BreakerOpen => "breaker_open",
            Self::StreamRepair => "stream_repair",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Whether the default retry predicate will try this class again.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork | Self::RateLimited)
    }

    /// Whether a failure of this class always counts against circuit health.
    ///
    /// `HttpError` is decided per status by [`crate::Error::is_infrastructure`].
    #[inline]
    pub fn affects_circuit(&self) -> bool {
        matches!(self, Self::TransientNetwork | Self::RateLimited)
    }

    /// Maps an HTTP status code to the provider-facing classification.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            401 | 403 => Self::Authentication,
            413 => Self::PayloadTooLarge,
            400 | 422 => Self::Validation,
            408 => Self::TransientNetwork,
            _ => Self::HttpError,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
