//! Destination provider contract and its declarative settings schema.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{DeliveryResult, EventPayload, IntegrationConfig, Result};

/// Input widget type of a settings or credential field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "options", rename_all = "snake_case")]
pub enum FieldType {
    /// Free-form single line text.
    Text,
    /// Absolute http(s) URL.
    Url,
    /// Secret value, rendered masked.
    Secret,
    /// Whole number.
    Number,
    /// On/off toggle.
    Boolean,
    /// One of a fixed set of values.
    Select(&'static [&'static str]),
    /// String to string map (e.g. custom headers).
    KeyValue,
    /// List of email addresses.
    EmailList,
}

/// One field of a provider's configuration form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    /// Key in the settings or credentials map.
    pub key: &'static str,
    /// Label shown in the configuration UI.
    pub label: &'static str,
    /// Input widget type.
    pub field_type: FieldType,
    /// Whether the field must be set.
    pub required: bool,
    /// Default value, rendered as text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    /// Validation hint shown next to the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<&'static str>,
}

impl FieldSpec {
    /// Creates a required field.
    pub const fn required(key: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Self {
            key,
            label,
            field_type,
            required: true,
            default: None,
            help: None,
        }
    }

    /// Creates an optional field.
    pub const fn optional(key: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Self {
            key,
            label,
            field_type,
            required: false,
            default: None,
            help: None,
        }
    }

    /// Sets the default value.
    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets the validation hint.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

/// Static metadata describing a destination for the configuration UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    /// Key used by configs to select this provider.
    pub destination_type: &'static str,
    /// Human-readable provider name.
    pub name: &'static str,
    /// Icon identifier.
    pub icon: &'static str,
    /// Whether `send` may be safely repeated for the same event.
    pub idempotent: bool,
    /// Ordered settings fields.
    pub settings: &'static [FieldSpec],
    /// Ordered credential fields.
    pub credentials: &'static [FieldSpec],
}

/// Capability contract every destination implements.
///
/// `validate` is local and deterministic. `test` and `send` talk to the
/// destination and classify failures through the returned result's
/// `error_kind`, so the caller can tell transient from terminal failures.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider's static metadata.
    fn descriptor(&self) -> &'static ProviderDescriptor;

    /// Returns the destination type this provider serves.
    fn destination_type(&self) -> &'static str {
        self.descriptor().destination_type
    }

    /// Checks the config structurally without touching the network.
    fn validate(&self, config: &IntegrationConfig) -> Result<()>;

    /// Returns whether [`Provider::validate`] accepts the config.
    fn is_valid(&self, config: &IntegrationConfig) -> bool {
        self.validate(config).is_ok()
    }

    /// Checks connectivity and credentials, preferably without side effects.
    async fn test(&self, config: &IntegrationConfig, cancel: &CancellationToken)
    -> DeliveryResult;

    /// Delivers `payload` to the destination described by `config`.
    async fn send(
        &self,
        payload: &EventPayload,
        config: &IntegrationConfig,
        cancel: &CancellationToken,
    ) -> DeliveryResult;
}
