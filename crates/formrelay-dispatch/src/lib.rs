#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod manager;
mod registry;
mod store;

pub mod provider;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;

pub use formrelay_core::{
    DeliveryResult, DispatchSummary, Error, ErrorKind, EventKind, EventPayload,
    IntegrationConfig, Provider, ProviderDescriptor, Result,
};
pub use manager::{DEFAULT_SEND_TIMEOUT_SECS, IntegrationManager, ManagerConfig};
pub use registry::IntegrationRegistry;
pub use store::{ConfigStore, SharedConfig};

/// Tracing target for integration manager operations.
pub const TRACING_TARGET_MANAGER: &str = "formrelay_dispatch::manager";

/// Tracing target for provider registry operations.
pub const TRACING_TARGET_REGISTRY: &str = "formrelay_dispatch::registry";
