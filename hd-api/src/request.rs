//! Request identity, per-call options, and the retry policy.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use hd_core::error::HdError;

/// Identity of a request for deduplication: method + path + serialized body.
///
/// Two calls with the same key observe a single network call and share its
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(method: &Method, path: &str, body: Option<&Value>) -> Self {
        let body_part = body.map(Value::to_string).unwrap_or_default();
        Self(format!("{method}|{path}|{body_part}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Override the client's default timeout.
    pub timeout: Option<Duration>,
    /// Do not attach the bearer token.
    pub skip_auth: bool,
    /// This call IS the refresh endpoint: a 401 must not trigger another
    /// refresh (prevents recursive refresh loops).
    pub is_refresh: bool,
}

impl RequestOptions {
    /// Options for a refresh-endpoint call.
    pub fn refresh() -> Self {
        Self {
            is_refresh: true,
            ..Self::default()
        }
    }

    /// Options for an unauthenticated call.
    pub fn unauthenticated() -> Self {
        Self {
            skip_auth: true,
            ..Self::default()
        }
    }
}

/// Retry policy applied per call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, first try included.
    pub max_attempts: u32,
    /// Base delay before the first retry (doubles each attempt).
    pub base_delay: Duration,
    /// Predicate deciding whether an error is retryable.
    pub retry_on: fn(&HdError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            retry_on: HdError::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Build a policy from configuration, keeping the default predicate.
    pub fn from_config(config: &hd_core::config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the retry following the given attempt (1-based):
    /// `base_delay * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16)))
    }
}
