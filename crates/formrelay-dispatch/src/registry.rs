//! Registry of destination providers keyed by destination type.

use std::collections::BTreeMap;
use std::sync::Arc;

use formrelay_core::{Error, Provider, ProviderDescriptor, Result};
use formrelay_webhook::DeliveryTransport;

use crate::TRACING_TARGET_REGISTRY;
use crate::provider::{DatabaseProvider, EmailProvider, SpreadsheetProvider, WebhookProvider};

/// Maps destination types to their providers.
///
/// Built mutably during startup, then shared behind an [`Arc`].
#[derive(Clone, Default)]
pub struct IntegrationRegistry {
    providers: BTreeMap<&'static str, Arc<dyn Provider>>,
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl IntegrationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in provider sharing `transport`.
    pub fn with_defaults(transport: DeliveryTransport) -> Self {
        let mut registry = Self::new();
        registry.register(WebhookProvider::new(transport.clone()));
        registry.register(SpreadsheetProvider::new(transport.clone()));
        registry.register(DatabaseProvider::new(transport.clone()));
        registry.register(EmailProvider::new(transport));
        registry
    }

    /// Registers `provider`, replacing any provider with the same destination type.
    pub fn register<P: Provider + 'static>(&mut self, provider: P) -> &mut Self {
        self.register_shared(Arc::new(provider))
    }

    /// Registers an already shared provider.
    pub fn register_shared(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        let destination_type = provider.destination_type();
        let replaced = self.providers.insert(destination_type, provider).is_some();

        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            destination_type,
            replaced,
            "Registered provider"
        );

        self
    }

    /// Returns the provider for `destination_type`.
    pub fn resolve(&self, destination_type: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(destination_type)
            .cloned()
            .ok_or_else(|| Error::provider_not_found(destination_type))
    }

    /// Returns whether a provider is registered for `destination_type`.
    pub fn contains(&self, destination_type: &str) -> bool {
        self.providers.contains_key(destination_type)
    }

    /// Descriptors of every registered provider, sorted by destination type.
    pub fn list(&self) -> Vec<&'static ProviderDescriptor> {
        self.providers
            .values()
            .map(|provider| provider.descriptor())
            .collect()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use formrelay_core::ErrorKind;
    use formrelay_webhook::TransportConfig;

    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn test_with_defaults_lists_sorted() {
        let transport = DeliveryTransport::new(TransportConfig::default()).unwrap();
        let registry = IntegrationRegistry::with_defaults(transport);

        let types: Vec<_> = registry
            .list()
            .into_iter()
            .map(|descriptor| descriptor.destination_type)
            .collect();
        assert_eq!(
            types,
            vec!["email", "spreadsheet", "webhook", "workspace-database"]
        );
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = IntegrationRegistry::new();
        registry.register(MockProvider::new("mock"));
        registry.register(MockProvider::new("mock"));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("mock"));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = IntegrationRegistry::new();
        assert!(registry.is_empty());

        let err = registry.resolve("fax").err().unwrap();
        assert_eq!(err.kind, ErrorKind::ProviderNotFound);
        assert!(err.to_string().contains("fax"));
    }
}
