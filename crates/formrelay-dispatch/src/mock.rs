//! Mock destination provider for testing.
//!
//! This module is only available when the `test-utils` feature is enabled:
//!
//! ```toml
//! [dev-dependencies]
//! formrelay-dispatch = { version = "...", features = ["test-utils"] }
//! ```
//!
//! Clones share their state, so a test can register one clone and inspect
//! the sends through another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use formrelay_core::{
    AttemptOutcome, DeliveryAttempt, DeliveryResult, Error, ErrorKind, EventPayload,
    IntegrationConfig, Provider, ProviderDescriptor, Result,
};
use jiff::Timestamp;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Scripted result of one mock send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Accept the delivery with an optional external id.
    Success(Option<String>),
    /// Fail the delivery with the given classification.
    Failure(ErrorKind),
}

/// A send observed by [`MockProvider`].
#[derive(Debug, Clone)]
pub struct RecordedSend {
    /// Config the send was made for.
    pub config_id: Uuid,
    /// The delivered payload.
    pub payload: EventPayload,
}

#[derive(Debug, Default)]
struct MockState {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    sends: Mutex<Vec<RecordedSend>>,
    tests: Mutex<Vec<Uuid>>,
}

/// In-memory provider that records sends and replays scripted outcomes.
///
/// Sends succeed unless an outcome has been queued with
/// [`MockProvider::push_outcome`].
#[derive(Debug, Clone)]
pub struct MockProvider {
    descriptor: &'static ProviderDescriptor,
    delay: Duration,
    rejection: Option<&'static str>,
    state: Arc<MockState>,
}

impl MockProvider {
    /// Creates a mock serving `destination_type`.
    pub fn new(destination_type: &'static str) -> Self {
        // Descriptors are static; mocks are created a handful of times per test run.
        let descriptor = Box::leak(Box::new(ProviderDescriptor {
            destination_type,
            name: "Mock",
            icon: "mock",
            idempotent: true,
            settings: &[],
            credentials: &[],
        }));

        Self {
            descriptor,
            delay: Duration::ZERO,
            rejection: None,
            state: Arc::default(),
        }
    }

    /// Delays every send, honoring cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes `validate` reject every config with `message`.
    pub fn rejecting(mut self, message: &'static str) -> Self {
        self.rejection = Some(message);
        self
    }

    /// Queues the outcome of a future send.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.state
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Sends made so far.
    pub fn sends(&self) -> Vec<RecordedSend> {
        self.state
            .sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of sends made for `config_id`.
    pub fn send_count(&self, config_id: Uuid) -> usize {
        self.sends()
            .iter()
            .filter(|send| send.config_id == config_id)
            .count()
    }

    /// Configs that were connectivity-checked.
    pub fn tested(&self) -> Vec<Uuid> {
        self.state
            .tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_outcome(&self) -> MockOutcome {
        self.state
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(MockOutcome::Success(None))
    }

    async fn respond(&self, config: &IntegrationConfig, cancel: &CancellationToken) -> DeliveryResult {
        let started_at = Timestamp::now();

        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let error = Error::cancelled().with_message("delivery cancelled");
                    let attempt = DeliveryAttempt::new(1, started_at, AttemptOutcome::Cancelled);
                    return DeliveryResult::failed(config, &error).with_attempts(vec![attempt]);
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        match self.next_outcome() {
            MockOutcome::Success(external_id) => DeliveryResult::succeeded(config)
                .with_external_id(external_id)
                .with_attempts(vec![DeliveryAttempt::new(
                    1,
                    started_at,
                    AttemptOutcome::Succeeded,
                )]),
            MockOutcome::Failure(kind) => {
                let error = Error::new(kind).with_message("mock failure");
                let outcome = if kind.is_retryable() {
                    AttemptOutcome::Retryable
                } else {
                    AttemptOutcome::Terminal
                };
                DeliveryResult::failed(config, &error)
                    .with_attempts(vec![DeliveryAttempt::new(1, started_at, outcome)])
            }
        }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn descriptor(&self) -> &'static ProviderDescriptor {
        self.descriptor
    }

    fn validate(&self, _config: &IntegrationConfig) -> Result<()> {
        match self.rejection {
            Some(message) => Err(Error::validation().with_message(message)),
            None => Ok(()),
        }
    }

    async fn test(&self, config: &IntegrationConfig, cancel: &CancellationToken) -> DeliveryResult {
        self.state
            .tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(config.id);
        self.respond(config, cancel).await
    }

    async fn send(
        &self,
        payload: &EventPayload,
        config: &IntegrationConfig,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        self.state
            .sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedSend {
                config_id: config.id,
                payload: payload.clone(),
            });
        self.respond(config, cancel).await
    }
}
