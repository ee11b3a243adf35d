#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod envelope;
mod error;
mod retry;
mod signing;
mod transport;

pub mod request;
pub mod response;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod testing;

pub use config::{
    DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS,
    TransportConfig,
};
pub use envelope::{Envelope, FormRef, TEST_EVENT};
pub use error::Error;
pub use request::OutboundRequest;
pub use response::{DeliveryResponse, StatusClass};
pub use retry::{DeliveryState, MAX_ATTEMPTS_LIMIT, RetryPolicy};
pub use signing::{SIGNATURE_PREFIX, sign_body, signature_header, verify_signature};
pub use transport::{DeliveryReport, DeliveryTransport};

/// Tracing target for delivery transport operations.
pub const TRACING_TARGET: &str = "formrelay_webhook::transport";
