//! Per-destination delivery outcomes.

use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::{Error, ErrorKind, IntegrationConfig};

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    /// The destination accepted the delivery.
    Succeeded,
    /// The attempt failed and may be retried.
    Retryable,
    /// The attempt failed and must not be retried.
    Terminal,
    /// The attempt was abandoned because the delivery was cancelled.
    Cancelled,
}

/// Record of one attempt to deliver to a destination. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// When the attempt started.
    pub started_at: Timestamp,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// HTTP status returned by the destination, if a response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Error description for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Time spent on the attempt.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl DeliveryAttempt {
    /// Creates a new attempt record.
    pub fn new(attempt: u32, started_at: Timestamp, outcome: AttemptOutcome) -> Self {
        Self {
            attempt,
            started_at,
            outcome,
            http_status: None,
            error_message: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Sets the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Sets the error description.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Sets the elapsed time.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Outcome of delivering one event to one integration config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    /// The config this result belongs to.
    pub config_id: Uuid,
    /// Destination type of the config.
    pub destination_type: String,
    /// Whether the destination accepted the delivery.
    pub success: bool,
    /// Identifier the destination assigned to the delivered item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Error description for failed deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Attempts made, in order.
    #[serde(default)]
    pub attempts: Vec<DeliveryAttempt>,
}

impl DeliveryResult {
    /// Creates a successful result for `config`.
    pub fn succeeded(config: &IntegrationConfig) -> Self {
        Self {
            config_id: config.id,
            destination_type: config.destination_type.clone(),
            success: true,
            external_id: None,
            error: None,
            error_kind: None,
            attempts: Vec::new(),
        }
    }

    /// Creates a failed result for `config` from a classified error.
    pub fn failed(config: &IntegrationConfig, error: &Error) -> Self {
        Self {
            config_id: config.id,
            destination_type: config.destination_type.clone(),
            success: false,
            external_id: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind),
            attempts: Vec::new(),
        }
    }

    /// Sets the destination-assigned identifier.
    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    /// Sets the attempt records.
    pub fn with_attempts(mut self, attempts: Vec<DeliveryAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    /// Returns whether the failure may succeed if delivered again later.
    pub fn is_retryable(&self) -> bool {
        self.error_kind.is_some_and(|kind| kind.is_retryable())
    }
}

/// Aggregate view over the mixed results of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Number of configs the event was delivered to.
    pub delivered: usize,
    /// Number of configs whose delivery failed.
    pub failed: usize,
}

impl DispatchSummary {
    /// Counts successes and failures in `results`.
    pub fn from_results(results: &[DeliveryResult]) -> Self {
        let delivered = results.iter().filter(|result| result.success).count();
        Self {
            delivered,
            failed: results.len() - delivered,
        }
    }

    /// Returns true if some but not all deliveries failed.
    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0 && self.delivered > 0
    }

    /// Returns true if every delivery succeeded (vacuously true when empty).
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;

    fn config() -> IntegrationConfig {
        IntegrationConfig::new("webhook", "f1").with_event(EventKind::Submission)
    }

    #[test]
    fn test_failed_result_carries_classification() {
        let error = Error::transient().with_message("HTTP 503");
        let result = DeliveryResult::failed(&config(), &error);

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransientDelivery));
        assert!(result.is_retryable());
        assert!(result.error.unwrap().contains("HTTP 503"));
    }

    #[test]
    fn test_summary_partial_failure() {
        let config = config();
        let results = vec![
            DeliveryResult::succeeded(&config),
            DeliveryResult::failed(&config, &Error::terminal()),
        ];

        let summary = DispatchSummary::from_results(&results);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.is_partial_failure());
        assert!(!summary.is_complete());
        assert!(DispatchSummary::from_results(&[]).is_complete());
    }

    #[test]
    fn test_attempt_serializes_elapsed_as_millis() {
        let attempt = DeliveryAttempt::new(1, Timestamp::UNIX_EPOCH, AttemptOutcome::Retryable)
            .with_status(500)
            .with_elapsed(Duration::from_millis(120));

        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["elapsed"], 120);
        assert_eq!(json["outcome"], "retryable");
        assert_eq!(json["httpStatus"], 500);
    }
}
