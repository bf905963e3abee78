//! Relay configuration.
//!
//! Durations are plain millisecond integers on the wire (`*_ms` keys) and are
//! converted to [`Duration`] when the components are built. Every section is
//! optional; missing keys take the component defaults.
//!
//! ```yaml
//! retry:
//!   max_retries: 2
//!   base_delay_ms: 500
//! rate_limit:
//!   capacity: 5
//!   interval_ms: 1000
//!   refill: continuous
//! circuit_breaker:
//!   failure_threshold: 3
//!   reset_timeout_ms: 10000
//!   failure_policy: all_errors
//! http:
//!   timeout_ms: 60000
//!   stream: true
//! providers:
//!   groq:
//!     model: llama-3.3-70b-versatile
//! ```
//!
//! Environment overrides (`LLM_RELAY_*`) are applied on top by
//! [`RelayConfig::from_env`]. API keys are never part of this struct; providers read
//! them from `<PROVIDER>_API_KEY` at construction.

use crate::pipeline::RunawayConfig;
use crate::resilience::{
    CircuitBreakerConfig, FailurePolicy, RateLimiterConfig, RefillStrategy, RetryPolicy,
};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Env var naming a YAML file loaded by [`RelayConfig::from_env`] before overrides.
pub const CONFIG_PATH_ENV: &str = "LLM_RELAY_CONFIG";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub retry: RetrySettings,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub runaway: RunawayConfig,
    pub http: HttpSettings,
    /// Per-provider overrides keyed by provider id (`mistral`, `groq`, ...).
    pub providers: HashMap<String, ProviderOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1_000,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_jitter(Duration::from_millis(self.max_jitter_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub interval_ms: u64,
    pub refill: RefillStrategy,
    /// Defaults to `interval_ms` when absent.
    pub queue_timeout_ms: Option<u64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 10,
            interval_ms: 1_000,
            refill: RefillStrategy::FixedWindow,
            queue_timeout_ms: None,
        }
    }
}

impl RateLimitSettings {
    pub fn to_config(&self) -> RateLimiterConfig {
        let mut cfg = RateLimiterConfig::new()
            .with_capacity(self.capacity)
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_refill_strategy(self.refill);
        if let Some(ms) = self.queue_timeout_ms {
            cfg = cfg.with_queue_timeout(Duration::from_millis(ms));
        }
        cfg
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_limit: u32,
    pub monitor_interval_ms: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_limit: 1,
            monitor_interval_ms: 1_000,
            failure_policy: FailurePolicy::InfrastructureOnly,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_reset_timeout(Duration::from_millis(self.reset_timeout_ms))
            .with_half_open_limit(self.half_open_limit)
            .with_monitor_interval(Duration::from_millis(self.monitor_interval_ms))
            .with_failure_policy(self.failure_policy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Whole-request deadline, body included.
    pub timeout_ms: u64,
    /// Minimum spacing between two requests from the same provider instance.
    pub min_request_interval_ms: u64,
    /// Ask providers for an event stream instead of a single JSON body.
    pub stream: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            min_request_interval_ms: 250,
            stream: true,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

impl RelayConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: RelayConfig = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                "invalid relay configuration",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config file {}", path.display()),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config"),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Defaults (or the file named by `LLM_RELAY_CONFIG`) plus `LLM_RELAY_*` overrides.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `LLM_RELAY_*` overrides read through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        override_parse(&get, "LLM_RELAY_MAX_RETRIES", &mut self.retry.max_retries)?;
        override_parse(&get, "LLM_RELAY_BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        override_parse(&get, "LLM_RELAY_MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;
        override_parse(&get, "LLM_RELAY_MAX_JITTER_MS", &mut self.retry.max_jitter_ms)?;
        override_parse(
            &get,
            "LLM_RELAY_RATE_LIMIT_CAPACITY",
            &mut self.rate_limit.capacity,
        )?;
        override_parse(
            &get,
            "LLM_RELAY_RATE_LIMIT_INTERVAL_MS",
            &mut self.rate_limit.interval_ms,
        )?;
        override_parse(
            &get,
            "LLM_RELAY_FAILURE_THRESHOLD",
            &mut self.circuit_breaker.failure_threshold,
        )?;
        override_parse(
            &get,
            "LLM_RELAY_RESET_TIMEOUT_MS",
            &mut self.circuit_breaker.reset_timeout_ms,
        )?;
        override_parse(&get, "LLM_RELAY_HTTP_TIMEOUT_MS", &mut self.http.timeout_ms)?;
        override_parse(
            &get,
            "LLM_RELAY_MIN_REQUEST_INTERVAL_MS",
            &mut self.http.min_request_interval_ms,
        )?;
        override_parse(&get, "LLM_RELAY_STREAM", &mut self.http.stream)?;

        if let Some(v) = get("LLM_RELAY_REFILL") {
            self.rate_limit.refill = match v.trim() {
                "fixed_window" => RefillStrategy::FixedWindow,
                "continuous" => RefillStrategy::Continuous,
                other => return Err(bad_override("LLM_RELAY_REFILL", other)),
            };
        }
        if let Some(v) = get("LLM_RELAY_FAILURE_POLICY") {
            self.circuit_breaker.failure_policy = match v.trim() {
                "all_errors" => FailurePolicy::AllErrors,
                "infrastructure_only" => FailurePolicy::InfrastructureOnly,
                other => return Err(bad_override("LLM_RELAY_FAILURE_POLICY", other)),
            };
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.to_config().validate()?;
        self.runaway.validate()?;
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure threshold must be at least 1",
                ErrorContext::new().with_field_path("circuit_breaker.failure_threshold"),
            ));
        }
        if self.circuit_breaker.half_open_limit == 0 {
            return Err(Error::configuration_with_context(
                "half-open limit must be at least 1",
                ErrorContext::new().with_field_path("circuit_breaker.half_open_limit"),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::configuration_with_context(
                "base delay exceeds max delay",
                ErrorContext::new()
                    .with_field_path("retry.base_delay_ms")
                    .with_details(format!(
                        "{} > {}",
                        self.retry.base_delay_ms, self.retry.max_delay_ms
                    )),
            ));
        }
        if self.http.timeout_ms == 0 {
            return Err(Error::configuration_with_context(
                "HTTP timeout must be non-zero",
                ErrorContext::new().with_field_path("http.timeout_ms"),
            ));
        }
        Ok(())
    }

    pub fn provider_override(&self, id: &str) -> Option<&ProviderOverride> {
        self.providers.get(id)
    }
}

fn override_parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<()> {
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|_| bad_override(key, raw.trim()))?;
    }
    Ok(())
}

fn bad_override(key: &str, value: &str) -> Error {
    Error::configuration_with_context(
        "invalid environment override",
        ErrorContext::new()
            .with_field_path(key)
            .with_details(format!("unparseable value '{}'", value))
            .with_source("config"),
    )
}
