//! Outbound HTTP delivery requests.

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::Method;
use url::Url;
use uuid::Uuid;

/// Header carrying the HMAC-SHA256 body signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";
/// Header carrying the unique delivery identifier.
pub const DELIVERY_ID_HEADER: &str = "X-Delivery-Id";
/// Header carrying the event kind.
pub const EVENT_HEADER: &str = "X-Event";
/// Header carrying the unix timestamp of the delivery.
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Headers set by the transport that custom headers may never replace.
pub const RESERVED_HEADERS: &[&str] = &[
    SIGNATURE_HEADER,
    DELIVERY_ID_HEADER,
    EVENT_HEADER,
    TIMESTAMP_HEADER,
    "Content-Type",
    "User-Agent",
];

/// Returns whether `name` is a header the transport owns.
pub fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name.trim()))
}

/// A single HTTP delivery to one destination.
///
/// The delivery id stays the same across every retry of the request, so
/// receivers can use it to drop duplicates.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Unique identifier for this delivery.
    pub delivery_id: Uuid,
    /// HTTP method.
    pub method: Method,
    /// Destination URL.
    pub url: Url,
    /// Event kind sent in the event header, if any.
    pub event: Option<String>,
    /// Additional headers, applied unless reserved.
    pub headers: BTreeMap<String, String>,
    /// JSON body.
    pub body: Option<Bytes>,
    /// Signing secret; signing is skipped when absent.
    pub secret: Option<String>,
}

impl OutboundRequest {
    /// Creates a new request with a fresh delivery id.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            delivery_id: Uuid::now_v7(),
            method,
            url,
            event: None,
            headers: BTreeMap::new(),
            body: None,
            secret: None,
        }
    }

    /// Creates a POST request.
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Creates a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Sets the event kind.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn with_json<T: serde::Serialize>(mut self, value: &T) -> formrelay_core::Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(value)?));
        Ok(self)
    }

    /// Sets the signing secret; `None` or a blank secret disables signing.
    pub fn with_secret(mut self, secret: Option<impl Into<String>>) -> Self {
        self.secret = secret
            .map(Into::into)
            .filter(|secret: &String| !secret.is_empty());
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds several headers.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets a bearer token authorization header.
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    /// Iterates the headers that survive reserved-name filtering.
    pub fn custom_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(name, _)| !is_reserved_header(name))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}
