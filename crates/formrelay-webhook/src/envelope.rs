//! Canonical JSON envelope sent to webhook destinations.

use bytes::Bytes;
use formrelay_core::{EventMetadata, EventPayload, Result};
use jiff::Timestamp;
use serde::Serialize;
use serde_json::{Map, Value};

/// Event name used for connectivity checks.
pub const TEST_EVENT: &str = "test";

/// Form reference inside the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct FormRef<'a> {
    /// Form identifier.
    pub id: &'a str,
    /// Form name.
    pub name: &'a str,
}

/// The body delivered to webhook endpoints.
///
/// Serialized as `{event, timestamp, form: {id, name}, data, metadata}`.
/// The envelope is serialized once per delivery and the same bytes are
/// signed and sent on every attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a> {
    /// Event kind in wire form.
    pub event: &'a str,
    /// When the event occurred.
    pub timestamp: Timestamp,
    /// The form the event belongs to.
    pub form: FormRef<'a>,
    /// Field label to answer mapping, in form order.
    pub data: &'a Map<String, Value>,
    /// Optional request-level details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<&'a EventMetadata>,
}

impl<'a> Envelope<'a> {
    /// Builds the envelope for an event payload.
    pub fn from_payload(payload: &'a EventPayload) -> Self {
        Self {
            event: payload.event_kind.into(),
            timestamp: payload.timestamp,
            form: FormRef {
                id: &payload.form_id,
                name: &payload.form_name,
            },
            data: &payload.data,
            metadata: payload.metadata.as_ref(),
        }
    }

    /// Builds a connectivity-check envelope for a form.
    pub fn test(form_id: &'a str, form_name: &'a str, data: &'a Map<String, Value>) -> Self {
        Self {
            event: TEST_EVENT,
            timestamp: Timestamp::now(),
            form: FormRef {
                id: form_id,
                name: form_name,
            },
            data,
            metadata: None,
        }
    }

    /// Serializes the envelope into the exact bytes to sign and send.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}
