//! Integration manager: config lifecycle and event fan-out.

use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use formrelay_core::{
    DeliveryResult, Error, ErrorKind, EventPayload, IntegrationConfig, Result,
};
use futures_util::future::join_all;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{ConfigStore, SharedConfig};
use crate::{IntegrationRegistry, TRACING_TARGET_MANAGER};

/// Default overall time budget for one config's delivery: 60 seconds.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 60;

/// Configuration for the integration manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct ManagerConfig {
    /// Overall time budget in seconds for delivering to one integration,
    /// retries included
    ///
    /// A delivery cut off by this budget reports no attempt records, so keep
    /// it above `max_attempts * (attempt timeout + max backoff)`.
    #[cfg_attr(
        feature = "config",
        arg(long = "send-timeout", env = "SEND_TIMEOUT", default_value = "60")
    )]
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_send_timeout_secs() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl ManagerConfig {
    /// Returns the effective send timeout, using the default if zero.
    pub fn send_timeout(&self) -> Duration {
        if self.send_timeout_secs == 0 {
            Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.send_timeout_secs)
        }
    }

    /// Set the send timeout in seconds.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout_secs: u64) -> Self {
        self.send_timeout_secs = timeout_secs;
        self
    }
}

/// Inner manager state shared between clones.
struct ManagerInner {
    registry: Arc<IntegrationRegistry>,
    store: ConfigStore,
    config: ManagerConfig,
    cancel: CancellationToken,
}

/// Owns the integration configs and fans events out to their providers.
///
/// Deliveries for different configs run concurrently, and one config's
/// failure never affects another's. Every delivery updates the health
/// counters of its config.
#[derive(Clone)]
pub struct IntegrationManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for IntegrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationManager")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .field("shutdown", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl IntegrationManager {
    /// Creates a manager resolving providers through `registry`.
    pub fn new(registry: Arc<IntegrationRegistry>, config: ManagerConfig) -> Self {
        tracing::debug!(
            target: TRACING_TARGET_MANAGER,
            providers = registry.len(),
            send_timeout_secs = config.send_timeout().as_secs(),
            "Creating integration manager"
        );

        Self {
            inner: Arc::new(ManagerInner {
                registry,
                store: ConfigStore::new(),
                config,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Gets the provider registry.
    pub fn registry(&self) -> &IntegrationRegistry {
        &self.inner.registry
    }

    /// Gets the manager configuration.
    pub fn manager_config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Validates `config` and stores it, returning the config it replaced.
    ///
    /// Fails with `ProviderNotFound` when no provider serves the destination
    /// type, and with `Validation` when the config or its provider settings
    /// are malformed.
    pub async fn register_config(
        &self,
        config: IntegrationConfig,
    ) -> Result<Option<IntegrationConfig>> {
        config.validate()?;
        let provider = self.inner.registry.resolve(&config.destination_type)?;
        provider.validate(&config).map_err(|err| {
            err.with_context(format!("integration {}", config.id))
        })?;

        tracing::info!(
            target: TRACING_TARGET_MANAGER,
            config_id = %config.id,
            destination_type = %config.destination_type,
            form_id = %config.form_id,
            enabled = config.enabled,
            "Registered integration"
        );

        Ok(self.inner.store.upsert(config).await)
    }

    /// Removes the config with `id`, returning it if it existed.
    pub async fn remove_config(&self, id: Uuid) -> Option<IntegrationConfig> {
        let removed = self.inner.store.remove(id).await;
        if removed.is_some() {
            tracing::info!(
                target: TRACING_TARGET_MANAGER,
                config_id = %id,
                "Removed integration"
            );
        }
        removed
    }

    /// Returns a snapshot of the config with `id`, health included.
    pub async fn config(&self, id: Uuid) -> Option<IntegrationConfig> {
        self.inner.store.snapshot(id).await
    }

    /// Returns snapshots of every registered config.
    pub async fn configs(&self) -> Vec<IntegrationConfig> {
        self.inner.store.all().await
    }

    /// Returns snapshots of every config of `form_id`, enabled or not.
    pub async fn configs_for_form(&self, form_id: &str) -> Vec<IntegrationConfig> {
        self.inner.store.for_form(form_id).await
    }

    /// Runs the provider connectivity check for the config with `id`.
    ///
    /// Health counters are left untouched.
    pub async fn test_config(&self, id: Uuid) -> Result<DeliveryResult> {
        let config = self.inner.store.snapshot(id).await.ok_or_else(|| {
            Error::invalid_input().with_message(format!("integration {id} is not registered"))
        })?;

        let provider = match self.inner.registry.resolve(&config.destination_type) {
            Ok(provider) => provider,
            Err(err) => return Ok(DeliveryResult::failed(&config, &err)),
        };

        let timeout = self.inner.config.send_timeout();
        let result = tokio::time::timeout(timeout, provider.test(&config, &self.inner.cancel))
            .await
            .unwrap_or_else(|_| DeliveryResult::failed(&config, &timeout_error(timeout)));

        tracing::info!(
            target: TRACING_TARGET_MANAGER,
            config_id = %id,
            destination_type = %config.destination_type,
            success = result.success,
            "Tested integration"
        );

        Ok(result)
    }

    /// Delivers `payload` to every enabled config of `form_id` subscribed to
    /// its event, returning one result per selected config.
    ///
    /// Fails only when the payload belongs to another form, has an empty
    /// form id, or the manager has been shut down.
    #[tracing::instrument(
        skip(self, payload),
        fields(
            form_id = %form_id,
            event = %payload.event_kind,
        )
    )]
    pub async fn dispatch(&self, form_id: &str, payload: &EventPayload) -> Result<Vec<DeliveryResult>> {
        payload.ensure_for_form(form_id)?;

        if self.is_shutdown() {
            return Err(Error::cancelled().with_message("integration manager is shut down"));
        }

        let selected = self
            .inner
            .store
            .matching(form_id, payload.event_kind)
            .await;

        if selected.is_empty() {
            tracing::debug!(
                target: TRACING_TARGET_MANAGER,
                "No integrations subscribed to event"
            );
            return Ok(Vec::new());
        }

        tracing::debug!(
            target: TRACING_TARGET_MANAGER,
            integrations = selected.len(),
            "Dispatching event"
        );

        let results = join_all(
            selected
                .iter()
                .map(|shared| self.deliver_to(shared, payload)),
        )
        .await;

        let delivered = results.iter().filter(|result| result.success).count();
        tracing::info!(
            target: TRACING_TARGET_MANAGER,
            delivered,
            failed = results.len() - delivered,
            "Dispatch finished"
        );

        Ok(results)
    }

    /// Runs [`IntegrationManager::dispatch`] in the background.
    pub fn spawn_dispatch(
        &self,
        form_id: impl Into<String>,
        payload: EventPayload,
    ) -> JoinHandle<Result<Vec<DeliveryResult>>> {
        let manager = self.clone();
        let form_id = form_id.into();
        tokio::spawn(async move { manager.dispatch(&form_id, &payload).await })
    }

    /// Cancels in-flight deliveries and rejects further dispatches.
    pub fn shutdown(&self) {
        tracing::info!(
            target: TRACING_TARGET_MANAGER,
            "Shutting down integration manager"
        );
        self.inner.cancel.cancel();
    }

    /// Returns true once [`IntegrationManager::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Delivers to one config and records the outcome in its health counters.
    async fn deliver_to(&self, shared: &SharedConfig, payload: &EventPayload) -> DeliveryResult {
        let config = shared.read().await.clone();

        let result = match self.inner.registry.resolve(&config.destination_type) {
            Ok(provider) => {
                let timeout = self.inner.config.send_timeout();
                tokio::time::timeout(timeout, provider.send(payload, &config, &self.inner.cancel))
                    .await
                    .unwrap_or_else(|_| DeliveryResult::failed(&config, &timeout_error(timeout)))
            }
            Err(err) => DeliveryResult::failed(&config, &err),
        };

        // Abandoned deliveries say nothing about the destination.
        if result.error_kind != Some(ErrorKind::Cancelled) {
            let mut current = shared.write().await;
            if result.success {
                current.health.record_success(Timestamp::now());
            } else {
                current
                    .health
                    .record_failure(result.error.clone().unwrap_or_default());
            }
        }

        if result.success {
            tracing::debug!(
                target: TRACING_TARGET_MANAGER,
                config_id = %config.id,
                destination_type = %config.destination_type,
                attempts = result.attempts.len(),
                "Delivered to integration"
            );
        } else {
            tracing::warn!(
                target: TRACING_TARGET_MANAGER,
                config_id = %config.id,
                destination_type = %config.destination_type,
                error = result.error.as_deref().unwrap_or_default(),
                "Delivery to integration failed"
            );
        }

        result
    }
}

fn timeout_error(timeout: Duration) -> Error {
    Error::timeout().with_message(format!(
        "delivery did not finish within {}s",
        timeout.as_secs()
    ))
}
