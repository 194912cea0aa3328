//! Poll request model and boundary validation
//!
//! A [`PollRequest`] is deserialized and validated once, before a run is
//! created, and is immutable for the run's lifetime. Field names are
//! camelCase; the names used by earlier revisions of the public payload
//! (`delaySeconds`, `retryOptions`, PascalCase keys) are accepted as aliases.

use std::time::Duration;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use thiserror::Error;
use timekeeper_durable::reliability::RetryPolicy as TransportRetryPolicy;
use url::Url;

use crate::backoff::seconds;

/// Upper bound for transport attempts of a single logical call
pub const MAX_TRANSPORT_ATTEMPTS: u32 = 20;

/// Upper bound for regular poll attempts of a run
pub const MAX_POLL_RETRIES: u32 = 2000;

/// Errors raised while validating a poll request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The payload could not be deserialized
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A URL is not an absolute http(s) URL
    #[error("{field} must be an absolute http(s) URL: {reason}")]
    InvalidUrl {
        field: &'static str,
        reason: String,
    },

    /// A numeric field is outside its allowed range
    #[error("{field} must be {requirement}, got {value}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
        value: f64,
    },

    /// The run could need more history events than the executor keeps
    #[error("retryPolicy.maxRetries {max_retries} needs up to {events} history events, above the limit of {limit}")]
    HistoryLimit {
        max_retries: u32,
        events: usize,
        limit: usize,
    },
}

/// How a status-check response is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PollMode {
    /// Only the HTTP status code matters
    #[serde(alias = "RawCheck", alias = "raw_check")]
    RawCheck,

    /// A 200 response carries a `runtimeStatus` body that decides readiness
    #[default]
    #[serde(alias = "StatusAware", alias = "status_aware")]
    StatusAware,
}

impl std::fmt::Display for PollMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollMode::RawCheck => write!(f, "rawCheck"),
            PollMode::StatusAware => write!(f, "statusAware"),
        }
    }
}

/// Orchestration-level retry policy, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Wait before the first regular attempt
    #[serde(alias = "delaySeconds", alias = "DelaySeconds")]
    pub initial_delay_seconds: f64,

    /// Cap on any single wait; 0 means uncapped
    #[serde(alias = "MaxDelaySeconds")]
    pub max_delay_seconds: f64,

    /// One-time wait before the regular loop; 0 skips it
    #[serde(alias = "StartDelaySeconds")]
    pub start_delay_seconds: f64,

    /// Exponent applied to the attempt number
    #[serde(alias = "BackoffCoefficient")]
    pub backoff_coefficient: f64,

    /// Upper bound on regular poll attempts
    #[serde(alias = "MaxRetries", deserialize_with = "deserialize_count")]
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 5.0,
            max_delay_seconds: 60.0,
            start_delay_seconds: 0.0,
            backoff_coefficient: 1.2,
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    /// Set the initial delay
    pub fn with_initial_delay(mut self, seconds: f64) -> Self {
        self.initial_delay_seconds = seconds;
        self
    }

    /// Set the delay cap (0 = uncapped)
    pub fn with_max_delay(mut self, seconds: f64) -> Self {
        self.max_delay_seconds = seconds;
        self
    }

    /// Set the one-time start delay
    pub fn with_start_delay(mut self, seconds: f64) -> Self {
        self.start_delay_seconds = seconds;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the maximum number of regular poll attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check the policy invariants
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(
            "retryPolicy.initialDelaySeconds",
            "a finite number > 0",
            self.initial_delay_seconds,
            self.initial_delay_seconds > 0.0,
        )?;
        require(
            "retryPolicy.maxDelaySeconds",
            "a finite number >= 0",
            self.max_delay_seconds,
            self.max_delay_seconds >= 0.0,
        )?;
        require(
            "retryPolicy.startDelaySeconds",
            "a finite number >= 0",
            self.start_delay_seconds,
            self.start_delay_seconds >= 0.0,
        )?;
        require(
            "retryPolicy.backoffCoefficient",
            "a finite number >= 1",
            self.backoff_coefficient,
            self.backoff_coefficient >= 1.0,
        )?;
        require(
            "retryPolicy.maxRetries",
            "at most 2000",
            f64::from(self.max_retries),
            self.max_retries <= MAX_POLL_RETRIES,
        )
    }

    /// Status checks a run performs at most, counting the start-delay poll
    pub fn max_polls(&self) -> u32 {
        let start_poll = u32::from(self.start_delay_seconds > 0.0);
        self.max_retries.saturating_add(start_poll)
    }
}

/// Transport-level retry parameters for each outbound call
///
/// These retries happen inside the HTTP client and never count as poll
/// attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportOptions {
    /// Wait before the first transport retry
    pub first_retry_interval_seconds: f64,

    /// Total transport attempts per logical call, including the first
    #[serde(deserialize_with = "deserialize_count")]
    pub max_attempts: u32,

    /// Multiplier applied between transport retries
    pub backoff_coefficient: f64,

    /// Cap on a single transport retry wait; 0 means uncapped
    pub max_retry_interval_seconds: f64,

    /// Timeout for each individual HTTP call
    pub timeout_seconds: f64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            first_retry_interval_seconds: 1.0,
            max_attempts: 3,
            backoff_coefficient: 2.0,
            max_retry_interval_seconds: 30.0,
            timeout_seconds: 30.0,
        }
    }
}

impl TransportOptions {
    /// Options that try each call exactly once
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the first retry interval
    pub fn with_first_retry_interval(mut self, seconds: f64) -> Self {
        self.first_retry_interval_seconds = seconds;
        self
    }

    /// Set the number of attempts per call
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Retry policy applied by the HTTP client
    pub fn retry_policy(&self) -> TransportRetryPolicy {
        TransportRetryPolicy::exponential()
            .with_max_attempts(self.max_attempts)
            .with_initial_interval(seconds(self.first_retry_interval_seconds))
            .with_max_interval(seconds(self.max_retry_interval_seconds))
            .with_backoff_coefficient(self.backoff_coefficient)
    }

    /// Timeout for a single HTTP call
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds)
    }

    /// Worst-case wall time of one logical call including all retries
    ///
    /// Used as the activity start-to-close timeout.
    pub fn call_budget(&self) -> Duration {
        let policy = self.retry_policy().with_jitter(0.0);
        let attempts = self.max_attempts.clamp(1, MAX_TRANSPORT_ATTEMPTS);
        let waits = (2..=attempts)
            .map(|attempt| policy.delay_for_attempt(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);

        self.timeout()
            .saturating_mul(attempts)
            .saturating_add(waits.saturating_add(waits / 5))
            .saturating_add(Duration::from_secs(5))
    }

    /// Check the transport invariants
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(
            "transport.firstRetryIntervalSeconds",
            "a finite number >= 0",
            self.first_retry_interval_seconds,
            self.first_retry_interval_seconds >= 0.0,
        )?;
        require(
            "transport.maxAttempts",
            "between 1 and 20",
            f64::from(self.max_attempts),
            (1..=MAX_TRANSPORT_ATTEMPTS).contains(&self.max_attempts),
        )?;
        require(
            "transport.backoffCoefficient",
            "a finite number >= 1",
            self.backoff_coefficient,
            self.backoff_coefficient >= 1.0,
        )?;
        require(
            "transport.maxRetryIntervalSeconds",
            "a finite number >= 0",
            self.max_retry_interval_seconds,
            self.max_retry_interval_seconds >= 0.0,
        )?;
        require(
            "transport.timeoutSeconds",
            "a finite number > 0",
            self.timeout_seconds,
            self.timeout_seconds > 0.0,
        )
    }
}

/// A request to poll a resource and fire an action once it is ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    /// Endpoint polled on every attempt
    #[serde(alias = "StatusCheckUrl")]
    pub status_check_url: Url,

    /// Endpoint called exactly once when the resource is ready
    #[serde(alias = "ActionUrl")]
    pub action_url: Url,

    /// Payload forwarded verbatim to the action endpoint
    #[serde(default, alias = "Content")]
    pub content: serde_json::Value,

    /// Orchestration-level retry policy
    #[serde(default, alias = "retryOptions", alias = "RetryOptions")]
    pub retry_policy: RetryPolicy,

    /// Response interpretation mode
    #[serde(default, alias = "Mode")]
    pub mode: PollMode,

    /// Transport retry parameters for outbound calls
    #[serde(default)]
    pub transport: TransportOptions,
}

impl PollRequest {
    /// Create a request with default policy, mode and transport
    pub fn new(status_check_url: Url, action_url: Url) -> Self {
        Self {
            status_check_url,
            action_url,
            content: serde_json::Value::Null,
            retry_policy: RetryPolicy::default(),
            mode: PollMode::default(),
            transport: TransportOptions::default(),
        }
    }

    /// Set the action payload
    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the interpretation mode
    pub fn with_mode(mut self, mode: PollMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the transport options
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Deserialize and validate a request from loosely typed JSON
    pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
        let request: Self =
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Check every field of the request
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_url("statusCheckUrl", &self.status_check_url)?;
        validate_url("actionUrl", &self.action_url)?;
        self.retry_policy.validate()?;
        self.transport.validate()
    }
}

fn validate_url(field: &'static str, url: &Url) -> Result<(), ValidationError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            field,
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}

fn require(
    field: &'static str,
    requirement: &'static str,
    value: f64,
    holds: bool,
) -> Result<(), ValidationError> {
    if value.is_finite() && holds {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            requirement,
            value,
        })
    }
}

// Earlier payloads sent counts as floating point numbers
fn deserialize_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(D::Error::custom(format!(
            "expected a non-negative whole number, got {value}"
        )));
    }
    Ok(value as u32)
}
