//! Destination responses and their retry classification.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::Value;

/// Response headers that carry a destination-assigned correlation id.
const CORRELATION_HEADERS: &[&str] = &["x-request-id", "x-correlation-id", "x-delivery-receipt"];

/// Maximum number of body characters kept in error messages.
const ERROR_BODY_LIMIT: usize = 256;

/// How a response status affects the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx: the destination accepted the delivery.
    Success,
    /// 429, 5xx and anything else unexpected: try again later.
    Retryable,
    /// 4xx other than 429: the destination rejected the request deterministically.
    Terminal,
}

impl StatusClass {
    /// Classifies an HTTP status code.
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            429 => Self::Retryable,
            400..=499 => Self::Terminal,
            _ => Self::Retryable,
        }
    }
}

/// A successful response from a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status: u16,
    /// Correlation id from the response headers, if any.
    pub correlation_id: Option<String>,
    /// Parsed JSON body, if the destination returned one.
    pub body: Option<Value>,
}

impl DeliveryResponse {
    /// Builds a response from status, headers and raw body text.
    pub fn new(status: u16, headers: &HeaderMap, body: &str) -> Self {
        Self {
            status,
            correlation_id: correlation_id(headers),
            body: serde_json::from_str(body).ok(),
        }
    }

    /// Returns the string at `pointer` (RFC 6901) in the JSON body.
    pub fn body_str(&self, pointer: &str) -> Option<String> {
        self.body
            .as_ref()
            .and_then(|body| body.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// Destination-assigned id: a correlation header, or the body's `id` field.
    pub fn external_id(&self) -> Option<String> {
        self.correlation_id
            .clone()
            .or_else(|| self.body_str("/id"))
    }
}

/// Extracts the first correlation header present.
fn correlation_id(headers: &HeaderMap) -> Option<String> {
    CORRELATION_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    })
}

/// Parses a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Formats a failed response for error messages.
pub fn describe_failure(status: u16, body: &str) -> String {
    let snippet: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    if snippet.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {snippet}")
    }
}
