#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod delivery;
mod error;
mod event;
mod integration;
mod provider;

pub use delivery::{AttemptOutcome, DeliveryAttempt, DeliveryResult, DispatchSummary};
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use event::{EventKind, EventMetadata, EventPayload};
pub use integration::{Credentials, IntegrationConfig, IntegrationHealth};
pub use provider::{FieldSpec, FieldType, Provider, ProviderDescriptor};
