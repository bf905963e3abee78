use crate::error_code::ErrorClass;
use crate::pipeline::repair::RepairFailure;
use crate::transport::TransportError;
use std::io::ErrorKind;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "rate_limit.capacity")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "circuit_breaker", "provider_factory")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the relay.
///
/// Variants are grouped by who can act on them: configuration problems are fixed by
/// the operator, remote failures carry the HTTP classification, and resilience
/// rejections name the exhausted resource.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream repair failed: {0}")]
    StreamRepair(#[from] RepairFailure),

    #[error("Remote error from {provider}: HTTP {status} ({class}): {message}")]
    Remote {
        provider: String,
        status: u16,
        class: ErrorClass,
        message: String,
    },

    #[error("Rate limit wait timed out for '{resource}' after {waited_ms}ms")]
    RateLimitTimeout { resource: String, waited_ms: u64 },

    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen {
        name: String,
        /// Time left before the breaker will admit a trial call, if known.
        retry_in_ms: Option<u64>,
    },

    #[error("Unsupported provider '{key}' (expected one of: {supported})")]
    UnsupportedProvider { key: String, supported: String },

    #[error("Missing API key for provider '{provider}' (pass one explicitly or set {env_var})")]
    MissingCredential { provider: String, env_var: String },

    #[error("'{resource}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        resource: String,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Classify this error for retry and circuit-breaker decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Configuration { .. }
            | Error::UnsupportedProvider { .. }
            | Error::MissingCredential { .. } => ErrorClass::Configuration,
            Error::Validation { .. } => ErrorClass::Validation,
            Error::Runtime { .. } | Error::Serialization(_) => ErrorClass::Internal,
            Error::StreamRepair(_) => ErrorClass::StreamRepair,
            Error::Transport(t) if t.is_transient() => ErrorClass::TransientNetwork,
            Error::Transport(_) => ErrorClass::HttpError,
            Error::Io(e) => match e.kind() {
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut => ErrorClass::TransientNetwork,
                _ => ErrorClass::Internal,
            },
            Error::Remote { class, .. } => *class,
            Error::RateLimitTimeout { .. } => ErrorClass::RateLimited,
            Error::CircuitOpen { .. } => ErrorClass::BreakerOpen,
            Error::RetriesExhausted { last, .. } => last.class(),
        }
    }

    /// Default retry predicate: transient network failures and rate limiting.
    pub fn is_transient(&self) -> bool {
        match self {
            // Local queue timeouts are already a bounded wait; do not stack backoff on them.
            Error::RateLimitTimeout { .. } => false,
            Error::RetriesExhausted { .. } => false,
            _ => self.class().retryable(),
        }
    }

    /// Infrastructure failures: network errors, rate limiting, and 5xx responses.
    ///
    /// Application-level rejections (4xx validation, authentication, payload size)
    /// say nothing about the health of the remote resource.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Error::Remote { status, class, .. } => *status >= 500 || class.affects_circuit(),
            Error::Transport(_) => true,
            // Local queue wait; the resource itself was never contacted.
            Error::RateLimitTimeout { .. } => false,
            Error::RetriesExhausted { last, .. } => last.is_infrastructure(),
            other => other.class().affects_circuit(),
        }
    }

    /// The innermost error, looking through retry exhaustion wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}
