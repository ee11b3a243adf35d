//! Retry policy and the delivery state machine driven by the transport.
//!
//! A delivery moves through
//! `Pending -> Attempting -> {Succeeded, RetryWait, Terminal}`, and
//! `RetryWait` leads back to `Attempting` with the next attempt number.
//! Keeping the states explicit lets the transport race every attempt and
//! every backoff wait against a cancellation token.

use std::time::Duration;

/// Upper bound on attempts a single delivery may make.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Configuration for retry behavior on failed deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Whether failed attempts may be retried at all.
    pub enabled: bool,
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Maximum delay between two attempts.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            ..Self::default()
        }
    }

    /// Create a policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Enable or disable retries.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the maximum backoff duration.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Number of attempts this policy actually allows.
    pub fn attempt_limit(&self) -> u32 {
        if self.enabled {
            self.max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT)
        } else {
            1
        }
    }

    /// Returns true if the policy allows more than one attempt.
    pub fn retries(&self) -> bool {
        self.attempt_limit() > 1
    }

    /// Delay to wait after the failed attempt `attempt` (1-based).
    ///
    /// `retry_after` is the destination's own hint (e.g. from a 429); the wait
    /// is never shorter than the hint, and never longer than `max_backoff`.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff_millis =
            (self.initial_backoff.as_millis() as f64) * self.backoff_multiplier.powi(exponent);
        let backoff = Duration::from_millis(backoff_millis.min(u64::MAX as f64) as u64);

        let backoff = match retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };

        backoff.min(self.max_backoff)
    }

    /// Computes the state that follows a failed attempt.
    pub fn after_failure(
        &self,
        attempt: u32,
        retryable: bool,
        retry_after: Option<Duration>,
    ) -> DeliveryState {
        if retryable && attempt < self.attempt_limit() {
            DeliveryState::RetryWait {
                attempt,
                delay: self.backoff(attempt, retry_after),
            }
        } else {
            DeliveryState::Terminal
        }
    }
}

/// States of a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Nothing has been sent yet.
    Pending,
    /// Attempt number `attempt` (1-based) is in flight.
    Attempting {
        /// The attempt in flight.
        attempt: u32,
    },
    /// Attempt `attempt` failed and the next one starts after `delay`.
    RetryWait {
        /// The attempt that just failed.
        attempt: u32,
        /// How long to wait before the next attempt.
        delay: Duration,
    },
    /// The destination accepted the delivery.
    Succeeded,
    /// The delivery failed and will not be attempted again.
    Terminal,
}

impl DeliveryState {
    /// The state entered when leaving `Pending` or `RetryWait`.
    pub fn advance(self) -> Self {
        match self {
            Self::Pending => Self::Attempting { attempt: 1 },
            Self::RetryWait { attempt, .. } => Self::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    /// Returns true once the delivery has finished.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Terminal)
    }
}
