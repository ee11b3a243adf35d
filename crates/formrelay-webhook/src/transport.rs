//! Reqwest-based delivery transport with signing and retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use formrelay_core::{
    AttemptOutcome, DeliveryAttempt, DeliveryResult, Error, IntegrationConfig, Result,
};
use jiff::Timestamp;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::request::{DELIVERY_ID_HEADER, EVENT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::response::{StatusClass, describe_failure, retry_after};
use crate::signing::signature_header;
use crate::{
    DeliveryResponse, DeliveryState, OutboundRequest, RetryPolicy, TRACING_TARGET,
    TransportConfig,
};

/// Everything that happened while delivering one request.
#[derive(Debug)]
pub struct DeliveryReport {
    /// Identifier shared by every attempt of this delivery.
    pub delivery_id: Uuid,
    /// Attempts made, in order.
    pub attempts: Vec<DeliveryAttempt>,
    /// The accepted response, or the error that ended the delivery.
    pub outcome: Result<DeliveryResponse>,
}

impl DeliveryReport {
    /// Returns whether the destination accepted the delivery.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Converts the report into a per-config result, taking the external id
    /// from the response with `external_id`.
    pub fn into_result_with<F>(self, config: &IntegrationConfig, external_id: F) -> DeliveryResult
    where
        F: FnOnce(&DeliveryResponse) -> Option<String>,
    {
        match self.outcome {
            Ok(response) => DeliveryResult::succeeded(config)
                .with_external_id(external_id(&response))
                .with_attempts(self.attempts),
            Err(error) => DeliveryResult::failed(config, &error).with_attempts(self.attempts),
        }
    }

    /// Converts the report into a per-config result using the default
    /// correlation id lookup.
    pub fn into_result(self, config: &IntegrationConfig) -> DeliveryResult {
        self.into_result_with(config, DeliveryResponse::external_id)
    }
}

/// Result of one HTTP attempt.
enum AttemptResult {
    Delivered(DeliveryResponse),
    Failed {
        error: Error,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },
    Cancelled,
}

impl AttemptResult {
    fn failed(error: Error) -> Self {
        Self::Failed {
            error,
            status: None,
            retry_after: None,
        }
    }

    fn record(&self, attempt: u32, started_at: Timestamp, elapsed: Duration) -> DeliveryAttempt {
        match self {
            Self::Delivered(response) => {
                DeliveryAttempt::new(attempt, started_at, AttemptOutcome::Succeeded)
                    .with_status(response.status)
            }
            Self::Failed { error, status, .. } => {
                let outcome = if error.is_retryable() {
                    AttemptOutcome::Retryable
                } else {
                    AttemptOutcome::Terminal
                };
                let record = DeliveryAttempt::new(attempt, started_at, outcome)
                    .with_error(error_text(error));
                match status {
                    Some(status) => record.with_status(*status),
                    None => record,
                }
            }
            Self::Cancelled => DeliveryAttempt::new(attempt, started_at, AttemptOutcome::Cancelled)
                .with_error("delivery cancelled"),
        }
        .with_elapsed(elapsed)
    }
}

/// Inner transport state shared between clones.
struct TransportInner {
    http: Client,
    config: TransportConfig,
}

/// HTTP delivery transport used by webhook-class providers.
///
/// Each call to [`DeliveryTransport::deliver`] serializes nothing itself: the
/// caller provides the exact body bytes, which are signed once and reused on
/// every attempt. Attempts run under the configured per-attempt timeout and
/// race the cancellation token, as do the backoff waits between them.
#[derive(Clone)]
pub struct DeliveryTransport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for DeliveryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTransport")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl DeliveryTransport {
    /// Creates a new transport with the given configuration.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let user_agent = config.effective_user_agent();

        tracing::debug!(
            target: TRACING_TARGET,
            attempt_timeout_ms = config.attempt_timeout().as_millis(),
            user_agent = %user_agent,
            "Creating delivery transport"
        );

        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| {
                Error::configuration()
                    .with_message("failed to create HTTP client")
                    .with_source(err)
            })?;

        Ok(Self {
            inner: Arc::new(TransportInner { http, config }),
        })
    }

    /// Gets the transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Builds a retry policy with this transport's backoff bounds.
    pub fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        self.inner.config.retry_policy(max_attempts)
    }

    /// Delivers `request`, retrying according to `policy` until it succeeds,
    /// fails terminally, runs out of attempts, or `cancel` fires.
    pub async fn deliver(
        &self,
        request: &OutboundRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let signature = request
            .secret
            .as_deref()
            .zip(request.body.as_deref())
            .map(|(secret, body)| signature_header(secret, body));
        let timestamp = Timestamp::now().as_second();

        let mut attempts = Vec::new();
        let mut response = None;
        let mut last_error = None;
        let mut state = DeliveryState::Pending;

        while !state.is_final() {
            state = match state {
                DeliveryState::Pending => state.advance(),
                DeliveryState::Attempting { attempt } => {
                    let started_at = Timestamp::now();
                    let clock = Instant::now();

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => AttemptResult::Cancelled,
                        result = self.attempt(request, signature.as_deref(), timestamp) => result,
                    };
                    attempts.push(result.record(attempt, started_at, clock.elapsed()));

                    match result {
                        AttemptResult::Delivered(accepted) => {
                            response = Some(accepted);
                            DeliveryState::Succeeded
                        }
                        AttemptResult::Failed {
                            error,
                            retry_after,
                            ..
                        } => {
                            tracing::debug!(
                                target: TRACING_TARGET,
                                delivery_id = %request.delivery_id,
                                attempt,
                                error = %error,
                                "Delivery attempt failed"
                            );
                            let retryable = error.is_retryable();
                            last_error = Some(error);
                            policy.after_failure(attempt, retryable, retry_after)
                        }
                        AttemptResult::Cancelled => {
                            last_error = Some(cancelled());
                            DeliveryState::Terminal
                        }
                    }
                }
                DeliveryState::RetryWait { attempt, delay } => {
                    tracing::debug!(
                        target: TRACING_TARGET,
                        delivery_id = %request.delivery_id,
                        attempt = attempt + 1,
                        max_attempts = policy.attempt_limit(),
                        backoff_ms = delay.as_millis(),
                        "Retrying delivery after backoff"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            last_error = Some(cancelled());
                            DeliveryState::Terminal
                        }
                        _ = tokio::time::sleep(delay) => state.advance(),
                    }
                }
                DeliveryState::Succeeded | DeliveryState::Terminal => state,
            };
        }

        let outcome = match response {
            Some(response) => {
                tracing::debug!(
                    target: TRACING_TARGET,
                    delivery_id = %request.delivery_id,
                    status_code = response.status,
                    attempts = attempts.len(),
                    "Delivery accepted"
                );
                Ok(response)
            }
            None => {
                let error = finalize_error(last_error, attempts.len(), policy);
                tracing::warn!(
                    target: TRACING_TARGET,
                    delivery_id = %request.delivery_id,
                    url = %request.url,
                    attempts = attempts.len(),
                    error = %error,
                    "Delivery failed"
                );
                Err(error)
            }
        };

        DeliveryReport {
            delivery_id: request.delivery_id,
            attempts,
            outcome,
        }
    }

    /// Performs a single HTTP attempt.
    async fn attempt(
        &self,
        request: &OutboundRequest,
        signature: Option<&str>,
        timestamp: i64,
    ) -> AttemptResult {
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), request.url.clone())
            .timeout(self.inner.config.attempt_timeout());

        for (name, value) in request.custom_headers() {
            builder = builder.header(name, value);
        }

        builder = builder
            .header(DELIVERY_ID_HEADER, request.delivery_id.to_string())
            .header(TIMESTAMP_HEADER, timestamp.to_string());

        if let Some(event) = &request.event {
            builder = builder.header(EVENT_HEADER, event);
        }

        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }

        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return AttemptResult::failed(crate::Error::from(err).into()),
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        match StatusClass::of(status) {
            StatusClass::Success => {
                AttemptResult::Delivered(DeliveryResponse::new(status, &headers, &body))
            }
            StatusClass::Retryable => AttemptResult::Failed {
                error: Error::transient().with_message(describe_failure(status, &body)),
                status: Some(status),
                retry_after: retry_after(&headers),
            },
            StatusClass::Terminal => AttemptResult::Failed {
                error: Error::terminal().with_message(describe_failure(status, &body)),
                status: Some(status),
                retry_after: None,
            },
        }
    }
}

fn cancelled() -> Error {
    Error::cancelled().with_message("delivery cancelled")
}

fn error_text(error: &Error) -> String {
    error
        .message
        .as_deref()
        .map(str::to_owned)
        .unwrap_or_else(|| error.kind.to_string())
}

/// A retryable error that outlived the retry budget becomes terminal.
fn finalize_error(last_error: Option<Error>, attempts: usize, policy: &RetryPolicy) -> Error {
    let error = last_error.unwrap_or_else(|| {
        Error::terminal().with_message("delivery ended without an attempt")
    });

    if error.is_retryable() && policy.retries() {
        Error::terminal()
            .with_message(format!(
                "delivery failed after {attempts} attempts: {}",
                error_text(&error)
            ))
            .with_source(error)
    } else {
        error
    }
}
