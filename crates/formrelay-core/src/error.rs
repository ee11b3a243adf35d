//! Structured error handling for integration dispatch.

use hipstr::HipStr;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with our custom Error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categories of errors that can occur while configuring or delivering integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Integration config failed structural validation.
    Validation,
    /// No provider is registered for the destination type.
    ProviderNotFound,
    /// Network failure or retryable non-2xx response.
    TransientDelivery,
    /// The destination rejected the delivery deterministically.
    TerminalDelivery,
    /// An attempt or the whole delivery ran out of time.
    Timeout,
    /// The delivery was cancelled before it completed.
    Cancelled,
    /// The caller passed a malformed argument.
    InvalidInput,
    /// Runtime configuration error.
    Configuration,
    /// Serialization/deserialization error.
    Serialization,
}

impl ErrorKind {
    /// Check if this error kind is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientDelivery | Self::Timeout)
    }
}

/// Structured error type with classification and context tracking.
#[must_use]
#[derive(Debug, Error)]
#[error("[{kind}]{}", message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Primary error message.
    pub message: Option<HipStr<'static>>,
    /// Underlying source error, if any.
    #[source]
    pub source: Option<BoxedError>,
    /// Additional context information.
    pub context: Option<HipStr<'static>>,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: None,
        }
    }

    /// Creates a new error from a source error.
    pub fn from_source(kind: ErrorKind, source: impl Into<BoxedError>) -> Self {
        Self {
            kind,
            message: None,
            source: Some(source.into()),
            context: None,
        }
    }

    /// Creates a new validation error.
    pub fn validation() -> Self {
        Self::new(ErrorKind::Validation)
    }

    /// Creates a new provider-not-found error for the given destination type.
    pub fn provider_not_found(destination_type: &str) -> Self {
        Self::new(ErrorKind::ProviderNotFound)
            .with_message(format!("provider not found: {destination_type}"))
    }

    /// Creates a new transient delivery error.
    pub fn transient() -> Self {
        Self::new(ErrorKind::TransientDelivery)
    }

    /// Creates a new terminal delivery error.
    pub fn terminal() -> Self {
        Self::new(ErrorKind::TerminalDelivery)
    }

    /// Creates a new timeout error.
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates a new cancellation error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a new invalid input error.
    pub fn invalid_input() -> Self {
        Self::new(ErrorKind::InvalidInput)
    }

    /// Creates a new configuration error.
    pub fn configuration() -> Self {
        Self::new(ErrorKind::Configuration)
    }

    /// Creates a new serialization error.
    pub fn serialization() -> Self {
        Self::new(ErrorKind::Serialization)
    }

    /// Adds a message to this error.
    pub fn with_message(mut self, message: impl Into<HipStr<'static>>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the source of the error.
    pub fn with_source(mut self, source: impl Into<BoxedError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds context to the error.
    pub fn with_context(mut self, context: impl Into<HipStr<'static>>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Check if this error is retryable based on its kind.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::from_source(ErrorKind::Serialization, error).with_message("Invalid JSON document")
    }
}

impl From<url::ParseError> for Error {
    fn from(error: url::ParseError) -> Self {
        Self::from_source(ErrorKind::Validation, error).with_message("Invalid URL")
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_error_builder_pattern() {
        let error = Error::validation()
            .with_message("missing url")
            .with_context("webhook");

        assert_eq!(error.kind, ErrorKind::Validation);
        assert_eq!(error.message.as_deref(), Some("missing url"));
        assert_eq!(error.context.as_deref(), Some("webhook"));
        assert!(error.source.is_none());
    }

    #[test]
    fn test_error_display() {
        let error = Error::terminal().with_message("HTTP 404");

        let display_str = error.to_string();
        assert!(display_str.contains("terminal_delivery"));
        assert!(display_str.contains("HTTP 404"));
    }

    #[test]
    fn test_provider_not_found_message() {
        let error = Error::provider_not_found("fax");
        assert_eq!(error.kind, ErrorKind::ProviderNotFound);
        assert_eq!(error.message.as_deref(), Some("provider not found: fax"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = Error::from(json_error);
        assert_eq!(error.kind, ErrorKind::Serialization);
        assert!(error.source.is_some());
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::TransientDelivery.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());

        assert!(!ErrorKind::TerminalDelivery.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::ProviderNotFound.is_retryable());
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            ErrorKind::from_str("provider_not_found").unwrap(),
            ErrorKind::ProviderNotFound
        );
        assert_eq!(ErrorKind::from_str("timeout").unwrap(), ErrorKind::Timeout);
        assert!(ErrorKind::from_str("invalid").is_err());
    }
}
