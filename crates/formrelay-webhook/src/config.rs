//! Delivery transport configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

/// Default per-attempt timeout: 10 seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;

/// Default delay before the first retry: 500 milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Default upper bound for a single backoff delay: 30 seconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Configuration for the HTTP delivery transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct TransportConfig {
    /// Timeout in seconds for a single HTTP attempt
    #[cfg_attr(
        feature = "config",
        arg(long = "http-attempt-timeout", env = "HTTP_ATTEMPT_TIMEOUT", default_value = "10")
    )]
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// User-Agent header to send with requests
    #[cfg_attr(
        feature = "config",
        arg(long = "http-user-agent", env = "HTTP_USER_AGENT")
    )]
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Delay in milliseconds before the first retry
    #[cfg_attr(
        feature = "config",
        arg(long = "retry-initial-backoff", env = "RETRY_INITIAL_BACKOFF_MS", default_value = "500")
    )]
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound in milliseconds for a single retry delay
    #[cfg_attr(
        feature = "config",
        arg(long = "retry-max-backoff", env = "RETRY_MAX_BACKOFF_MS", default_value = "30000")
    )]
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_SECS
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout_secs(),
            user_agent: None,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl TransportConfig {
    /// Returns the effective per-attempt timeout, using the default if zero.
    pub fn attempt_timeout(&self) -> Duration {
        if self.attempt_timeout_secs == 0 {
            Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.attempt_timeout_secs)
        }
    }

    /// Returns the effective user agent, using the default if not set.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(Self::default_user_agent)
    }

    /// Returns the default user agent string.
    fn default_user_agent() -> String {
        format!("formrelay/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Builds a retry policy using this config's backoff bounds.
    pub fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(self.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
    }

    /// Set the per-attempt timeout in seconds.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout_secs: u64) -> Self {
        self.attempt_timeout_secs = timeout_secs;
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the backoff bounds in milliseconds.
    #[must_use]
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }
}
