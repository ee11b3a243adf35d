//! Integration configs: one form subscribed to one destination.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use jiff::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, EventKind, Result};

/// Opaque secret key-value bag attached to an integration.
///
/// Values are never printed by `Debug`. Providers read them through
/// [`Credentials::get`] and [`Credentials::require`] and validate them when the
/// config is registered.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Creates an empty credential bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a credential, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the credential if it is present and not blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns the credential or a validation error naming the missing key.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            Error::validation().with_message(format!("missing required credential '{key}'"))
        })
    }

    /// Returns true if no credentials are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|key| (key, "<redacted>")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Per-config delivery health, maintained by the integration manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationHealth {
    /// Completion time of the last successful delivery.
    #[serde(default)]
    pub last_delivery_at: Option<Timestamp>,
    /// Failed deliveries since the last success.
    #[serde(default)]
    pub consecutive_error_count: u32,
    /// Error text of the most recent failed delivery.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl IntegrationHealth {
    /// Records a successful delivery.
    pub fn record_success(&mut self, at: Timestamp) {
        self.last_delivery_at = Some(at);
        self.consecutive_error_count = 0;
        self.last_error = None;
    }

    /// Records a failed delivery.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
        self.last_error = Some(error.into());
    }
}

/// A persisted subscription binding one form to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfig {
    /// Unique identifier of this config.
    pub id: Uuid,
    /// Destination type used to resolve the provider (e.g. `webhook`).
    pub destination_type: String,
    /// Name shown in the configuration UI.
    #[serde(default)]
    pub display_name: String,
    /// Disabled configs never receive deliveries.
    #[serde(default)]
    pub enabled: bool,
    /// The form this config subscribes to.
    pub form_id: String,
    /// Secret credentials for the destination.
    #[serde(default)]
    pub credentials: Credentials,
    /// Destination-specific settings.
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Events this config receives.
    #[serde(default)]
    pub subscribed_events: BTreeSet<EventKind>,
    /// When the config was created.
    #[serde(default = "Timestamp::now")]
    pub created_at: Timestamp,
    /// When the config was last edited.
    #[serde(default = "Timestamp::now")]
    pub updated_at: Timestamp,
    /// Delivery health counters.
    #[serde(flatten)]
    pub health: IntegrationHealth,
}

impl IntegrationConfig {
    /// Creates a new enabled config with no subscriptions.
    pub fn new(destination_type: impl Into<String>, form_id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::now_v7(),
            destination_type: destination_type.into(),
            display_name: String::new(),
            enabled: true,
            form_id: form_id.into(),
            credentials: Credentials::new(),
            settings: Map::new(),
            subscribed_events: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            health: IntegrationHealth::default(),
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Enables or disables the config.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Subscribes to an additional event.
    pub fn with_event(mut self, event: EventKind) -> Self {
        self.subscribed_events.insert(event);
        self
    }

    /// Adds a setting value.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Adds a credential value.
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key, value);
        self
    }

    /// Returns whether this config subscribes to `event`.
    #[inline]
    pub fn subscribes_to(&self, event: EventKind) -> bool {
        self.subscribed_events.contains(&event)
    }

    /// Returns whether a dispatch of `event` for `form_id` should reach this config.
    pub fn matches(&self, form_id: &str, event: EventKind) -> bool {
        self.enabled && self.form_id == form_id && self.subscribes_to(event)
    }

    /// Deserializes the settings map into a provider's typed settings.
    pub fn settings_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.settings.clone())).map_err(|err| {
            Error::validation()
                .with_message(format!("invalid {} settings: {err}", self.destination_type))
                .with_source(err)
        })
    }

    /// Checks the provider-independent invariants of the config.
    pub fn validate(&self) -> Result<()> {
        if self.destination_type.trim().is_empty() {
            return Err(Error::validation().with_message("destination type is required"));
        }

        if self.form_id.trim().is_empty() {
            return Err(Error::validation().with_message("form id is required"));
        }

        if self.enabled && self.subscribed_events.is_empty() {
            return Err(Error::validation()
                .with_message("an enabled integration must subscribe to at least one event"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials: Credentials = [("secret", "s3cr3t")].into_iter().collect();
        let debug = format!("{credentials:?}");
        assert!(debug.contains("secret"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn test_credentials_require() {
        let credentials: Credentials = [("api_key", "k"), ("blank", "  ")].into_iter().collect();
        assert_eq!(credentials.require("api_key").unwrap(), "k");
        assert!(credentials.get("blank").is_none());

        let err = credentials.require("token").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Validation);
    }

    #[test]
    fn test_health_transitions() {
        let mut health = IntegrationHealth::default();
        health.record_failure("HTTP 500");
        health.record_failure("HTTP 502");
        assert_eq!(health.consecutive_error_count, 2);
        assert_eq!(health.last_error.as_deref(), Some("HTTP 502"));
        assert!(health.last_delivery_at.is_none());

        let now = Timestamp::now();
        health.record_success(now);
        assert_eq!(health.consecutive_error_count, 0);
        assert_eq!(health.last_delivery_at, Some(now));
        assert!(health.last_error.is_none());
    }

    #[test]
    fn test_enabled_config_requires_events() {
        let config = IntegrationConfig::new("webhook", "f1");
        assert!(config.validate().is_err());

        let config = config.with_event(EventKind::Submission);
        assert!(config.validate().is_ok());

        let disabled = IntegrationConfig::new("webhook", "f1").with_enabled(false);
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_matches() {
        let config = IntegrationConfig::new("webhook", "f1").with_event(EventKind::Submission);
        assert!(config.matches("f1", EventKind::Submission));
        assert!(!config.matches("f1", EventKind::Viewed));
        assert!(!config.matches("f2", EventKind::Submission));
        assert!(!config.with_enabled(false).matches("f1", EventKind::Submission));
    }

    #[test]
    fn test_config_json_shape() {
        let config: IntegrationConfig = serde_json::from_value(serde_json::json!({
            "id": "018f3a4e-0000-7000-8000-000000000001",
            "destinationType": "webhook",
            "enabled": true,
            "formId": "f1",
            "credentials": {"secret": "s3cr3t"},
            "settings": {"url": "https://example.com/hook"},
            "subscribedEvents": ["submission"],
            "consecutiveErrorCount": 2
        }))
        .unwrap();

        assert_eq!(config.credentials.get("secret"), Some("s3cr3t"));
        assert_eq!(config.health.consecutive_error_count, 2);
        assert!(config.subscribes_to(EventKind::Submission));
    }
}
